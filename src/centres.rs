//! Structure centres and the final catalogue files.
//!
//! Voids get a geometric circumcentre (the local watershed bottom found
//! from the four mutually-adjacent lowest-density tracers) and optionally
//! a volume-weighted barycentre; clusters are centred on their densest
//! member tracer.

use std::fs::File;
use std::io::{BufWriter, Write};

use log::info;

use crate::cosmo::Cosmology;
use crate::deser::adj::{read_adjacency, Adjacency};
use crate::deser::vol::read_volumes;
use crate::deser::zone::read_zones;
use crate::error::PipelineError;
use crate::mask::SkyMask;
use crate::numeric::solve_linear;
use crate::sky;
use crate::tess::StructureKind;
use crate::tracers::TracerTable;
use crate::watershed::{read_pruned_list, WatershedFiles};
use crate::deser::hierarchy::read_hierarchy;

/// Sentinel sky coordinates reported when centre extraction fails.
const FAILED_SKY_COORD: f64 = -60.0;
const FAILED_REDSHIFT: f64 = -1.0;

/// Sample geometry needed to express centres in survey coordinates.
pub struct SurveyGeometry<'a> {
  pub cosmo: &'a Cosmology,
  pub z_min: f64,
  pub z_max: f64,
  pub mask: &'a SkyMask,
}

/// Everything centre extraction needs to know about the sample.
pub struct CentreContext<'a> {
  /// Full tracer table (real tracers followed by buffers).
  pub tracers: &'a TracerTable,
  pub n_tracers: usize,
  pub n_total: usize,
  pub box_length: f64,
  pub handle: &'a str,
  /// `None` in box mode; box mode also implies periodic wrapping.
  pub survey: Option<SurveyGeometry<'a>>,
}

impl CentreContext<'_> {
  fn is_box(&self) -> bool {
    self.survey.is_none()
  }

  fn mean_volume(&self) -> f64 {
    self.box_length.powi(3) / self.n_total as f64
  }
}

/// Circumcentre of a tetrahedron via the bordered Gram system
/// `[2 P Pᵀ, 1; 1ᵀ, 0] · [λ; μ] = [diag(P Pᵀ); 1]`; the centre is the
/// barycentric combination λᵀ P. `None` for degenerate simplices.
fn circumcentre(vertices: &[[f64; 3]; 4]) -> Option<[f64; 3]> {
  let dot = |a: &[f64; 3], b: &[f64; 3]| a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
  let mut a = [0.0; 25];
  let mut b = [0.0; 5];
  for i in 0..4 {
    for j in 0..4 {
      a[i * 5 + j] = 2.0 * dot(&vertices[i], &vertices[j]);
    }
    a[i * 5 + 4] = 1.0;
    a[20 + i] = 1.0;
    b[i] = dot(&vertices[i], &vertices[i]);
  }
  a[24] = 0.0;
  b[4] = 1.0;
  let solution = solve_linear(&mut a, &mut b)?;
  let mut centre = [0.0; 3];
  for i in 0..4 {
    for k in 0..3 {
      centre[k] += solution[i] * vertices[i][k];
    }
  }
  Some(centre)
}

/// Ascending intersection of two sorted id slices.
fn intersect_sorted(a: &[u32], b: &[u32]) -> Vec<u32> {
  let mut out = Vec::new();
  let (mut i, mut j) = (0, 0);
  while i < a.len() && j < b.len() {
    match a[i].cmp(&b[j]) {
      std::cmp::Ordering::Less => i += 1,
      std::cmp::Ordering::Greater => j += 1,
      std::cmp::Ordering::Equal => {
        out.push(a[i]);
        i += 1;
        j += 1;
      }
    }
  }
  out
}

fn argmin_density(ids: &[u32], densities: &[f64]) -> u32 {
  let mut best = ids[0];
  let mut best_dens = densities[best as usize];
  for &id in &ids[1..] {
    if densities[id as usize] < best_dens {
      best = id;
      best_dens = densities[id as usize];
    }
  }
  best
}

/// The four mutually-adjacent lowest-density tracers around a core, or
/// `None` when the adjacency chain breaks (tessellation damage).
fn lowest_density_tetrahedron(core: u32, adjacency: &Adjacency, densities: &[f64]) -> Option<[u32; 4]> {
  let core_adjs = adjacency.neighbours_of(core as usize);
  if core_adjs.is_empty() {
    return None;
  }
  let first = argmin_density(core_adjs, densities);
  let mutual = intersect_sorted(core_adjs, adjacency.neighbours_of(first as usize));
  if mutual.is_empty() {
    return None;
  }
  let second = argmin_density(&mutual, densities);
  let final_set = intersect_sorted(&mutual, adjacency.neighbours_of(second as usize));
  if final_set.is_empty() {
    return None;
  }
  let third = argmin_density(&final_set, densities);
  Some([core, first, second, third])
}

/// A centre position converted to survey coordinates, or the sentinel
/// values when the centre falls outside the sample.
struct SkyPosition {
  ra: f64,
  dec: f64,
  redshift: f64,
  ang_radius: f64,
  failed: bool,
}

/// Converts a box-frame centre to (RA, Dec, z). With `check` set, a centre
/// outside the radial range or on an empty mask pixel is marked failed:
/// that indicates undetected tessellation leakage.
fn centre_to_sky(
  centre: [f64; 3],
  eff_rad: f64,
  box_length: f64,
  geom: &SurveyGeometry<'_>,
  check: bool,
) -> SkyPosition {
  let obs = [
    centre[0] - 0.5 * box_length,
    centre[1] - 0.5 * box_length,
    centre[2] - 0.5 * box_length,
  ];
  let (r, ra, dec) = sky::cartesian_to_equatorial(obs);
  let ang_radius = (eff_rad / r).to_degrees();
  if check {
    let in_range = r >= geom.cosmo.comoving_distance(geom.z_min) && r <= geom.cosmo.comoving_distance(geom.z_max);
    if !in_range || geom.mask.value_at(ra, dec) == 0.0 {
      return SkyPosition {
        ra: FAILED_SKY_COORD,
        dec: FAILED_SKY_COORD,
        redshift: FAILED_REDSHIFT,
        ang_radius: 0.0,
        failed: true,
      };
    }
  }
  SkyPosition {
    ra,
    dec,
    redshift: geom.cosmo.redshift(r),
    ang_radius,
    failed: false,
  }
}

fn catalogue_header(kind: StructureKind, n: usize, handle: &str, is_box: bool) -> String {
  let (id_name, delta_name, lambda_name) = match kind {
    StructureKind::Void => ("VoidID", "delta_min", "lambda_v"),
    StructureKind::Cluster => ("ClusterID", "delta_max", "lambda_c"),
  };
  let mut header = format!("# {} {} from {}\n", n, kind.label(), handle);
  if is_box {
    header.push_str(&format!(
      "# {} XYZ[3](Mpc/h) R_eff(Mpc/h) {} delta_avg {} DensRatio",
      id_name, delta_name, lambda_name
    ));
  } else {
    header.push_str(&format!(
      "# {} RA(deg) Dec(deg) redshift R_eff(Mpc/h) {} delta_avg {} DensRatio Theta_eff(deg) EdgeFlag",
      id_name, delta_name, lambda_name
    ));
  }
  header
}

/// Finds the circumcentre of every processed void and writes the void
/// catalogue. Updates `edge_flags` in place where geometry extraction
/// fails.
pub fn find_void_circumcentres(
  ctx: &CentreContext<'_>,
  files: &WatershedFiles,
  wtd_avg_dens: &[f64],
  edge_flags: &mut [i32],
) -> Result<(), PipelineError> {
  let list = read_pruned_list(&files.pruned_list())?;
  info!("identified {} voids, now extracting circumcentres", list.len());

  let densities: Vec<f64> = read_volumes(&files.raw_dir.join(format!("{}.vol", ctx.handle)), Some(ctx.n_tracers))?
    .iter()
    .map(|v| 1.0 / v)
    .collect();
  let adjacency = read_adjacency(&files.raw_dir.join(format!("{}.adj", ctx.handle)), Some(ctx.n_tracers))?;

  let cat_path = files.out_dir.join(format!("{}_cat.txt", files.prefix));
  let mut writer = BufWriter::new(File::create(&cat_path)?);
  writeln!(writer, "{}", catalogue_header(StructureKind::Void, list.len(), ctx.handle, ctx.is_box()))?;

  for (i, row) in list.iter().enumerate() {
    let void_id = row[0] as u32;
    let core = row[1] as u32;
    let core_density = row[2];
    let void_volume = row[6];
    let dens_ratio = row[7];
    let eff_rad = (3.0 * void_volume / (4.0 * std::f64::consts::PI)).cbrt();

    let centre = match lowest_density_tetrahedron(core, &adjacency, &densities) {
      Some(ids) => {
        let mut vertices = [[0.0; 3]; 4];
        for (slot, &id) in ids.iter().enumerate() {
          vertices[slot] = ctx.tracers.position(id as usize);
        }
        if ctx.is_box() {
          // minimum-image the other vertices around the core before
          // solving, then wrap the result back into the box
          let core_pos = vertices[0];
          for v in vertices.iter_mut().skip(1) {
            for k in 0..3 {
              v[k] = sky::nearest_image(v[k], core_pos[k], ctx.box_length);
            }
          }
        }
        match circumcentre(&vertices) {
          Some(mut c) => {
            if ctx.is_box() {
              for k in 0..3 {
                c[k] = sky::rewrap_centre(c[k], ctx.box_length);
              }
            }
            Some(c)
          }
          None => None,
        }
      }
      None => None,
    };
    let centre = match centre {
      Some(c) => c,
      None => {
        edge_flags[i] = 2;
        [0.0, 0.0, 0.0]
      }
    };

    let delta_min = core_density - 1.0;
    let delta_avg = wtd_avg_dens[i] - 1.0;
    let lambda = delta_avg * eff_rad.powf(StructureKind::Void.lambda_exponent());

    if let Some(geom) = &ctx.survey {
      let sky_pos = if edge_flags[i] == 2 {
        SkyPosition {
          ra: FAILED_SKY_COORD,
          dec: FAILED_SKY_COORD,
          redshift: FAILED_REDSHIFT,
          ang_radius: 0.0,
          failed: true,
        }
      } else {
        centre_to_sky(centre, eff_rad, ctx.box_length, geom, true)
      };
      if sky_pos.failed {
        edge_flags[i] = 2;
      }
      writeln!(
        writer,
        "{} {:.6} {:.3} {:.3} {:.4} {:.3} {:.6} {:.6} {:.6} {:.6} {}",
        void_id, sky_pos.ra, sky_pos.dec, sky_pos.redshift, eff_rad, delta_min, delta_avg, lambda, dens_ratio,
        sky_pos.ang_radius, edge_flags[i]
      )?;
    } else {
      writeln!(
        writer,
        "{} {:.6} {:.6} {:.6} {:.3} {:.6} {:.6} {:.6} {:.6}",
        void_id, centre[0], centre[1], centre[2], eff_rad, delta_min, delta_avg, lambda, dens_ratio
      )?;
    }
  }
  Ok(())
}

/// Member tracer ids of a structure: every real tracer whose zone belongs
/// to the structure's member zones.
fn member_tracers(zones: &[u32], member_zones: &[u32]) -> Vec<usize> {
  zones
    .iter()
    .enumerate()
    .filter(|(_, z)| member_zones.contains(z))
    .map(|(i, _)| i)
    .collect()
}

/// Finds the volume-weighted barycentre of every processed void and
/// writes the barycentre catalogue under `barycentres/`.
pub fn find_void_barycentres(
  ctx: &CentreContext<'_>,
  files: &WatershedFiles,
  edge_flags: &mut [i32],
) -> Result<(), PipelineError> {
  info!("now extracting void barycentres");
  let list = read_pruned_list(&files.pruned_list())?;
  let rows = read_hierarchy(&files.pruned_hierarchy())?;
  let zones = read_zones(&files.raw_dir.join(format!("{}.zone", ctx.handle)), Some(ctx.n_tracers))?;
  let volumes = read_volumes(&files.raw_dir.join(format!("{}.trvol", ctx.handle)), Some(ctx.n_tracers))?;
  let densities: Vec<f64> = read_volumes(&files.raw_dir.join(format!("{}.vol", ctx.handle)), Some(ctx.n_tracers))?
    .iter()
    .map(|v| 1.0 / v)
    .collect();

  let bary_dir = files.out_dir.join("barycentres");
  std::fs::create_dir_all(&bary_dir)?;
  let cat_path = bary_dir.join(format!("{}_baryC_cat.txt", files.prefix));
  let mut writer = BufWriter::new(File::create(&cat_path)?);
  writeln!(writer, "{}", catalogue_header(StructureKind::Void, list.len(), ctx.handle, ctx.is_box()))?;

  for (i, (row, hier)) in list.iter().zip(&rows).enumerate() {
    let core = row[1] as usize;
    let member_zones = hier.all_zones();
    let members = member_tracers(&zones, &member_zones);

    // work in a frame centred on the core tracer so the periodic wrap
    // can be applied per axis
    let core_pos = ctx.tracers.position(core);
    let mut vol_sum = 0.0;
    let mut weighted = [0.0; 3];
    let mut weighted_dens = 0.0;
    for &m in &members {
      let pos = ctx.tracers.position(m);
      let vol = volumes[m];
      for k in 0..3 {
        let mut delta = pos[k] - core_pos[k];
        if ctx.is_box() && delta.abs() > 0.5 * ctx.box_length {
          delta -= ctx.box_length * delta.signum();
        }
        weighted[k] += delta * vol;
      }
      vol_sum += vol;
      weighted_dens += densities[m] * vol;
    }
    let mut centre = [0.0; 3];
    for k in 0..3 {
      centre[k] = weighted[k] / vol_sum + core_pos[k];
      if ctx.is_box() {
        centre[k] = sky::rewrap_centre(centre[k], ctx.box_length);
      }
    }

    let void_volume = vol_sum * ctx.mean_volume();
    let eff_rad = (3.0 * void_volume / (4.0 * std::f64::consts::PI)).cbrt();
    let avg_dens = weighted_dens / vol_sum;
    let delta_min = row[2] - 1.0;
    let delta_avg = avg_dens - 1.0;
    let lambda = delta_avg * eff_rad.powf(StructureKind::Void.lambda_exponent());

    if let Some(geom) = &ctx.survey {
      let sky_pos = centre_to_sky(centre, eff_rad, ctx.box_length, geom, true);
      if sky_pos.failed {
        edge_flags[i] = 2;
      }
      writeln!(
        writer,
        "{} {:.6} {:.3} {:.3} {:.4} {:.3} {:.6} {:.6} {:.6} {:.6} {}",
        row[0] as u32, sky_pos.ra, sky_pos.dec, sky_pos.redshift, eff_rad, delta_min, delta_avg, lambda, row[7],
        sky_pos.ang_radius, edge_flags[i]
      )?;
    } else {
      writeln!(
        writer,
        "{} {:.6} {:.6} {:.6} {:.3} {:.6} {:.6} {:.6} {:.6}",
        row[0] as u32, centre[0], centre[1], centre[2], eff_rad, delta_min, delta_avg, lambda, row[7]
      )?;
    }
  }
  Ok(())
}

/// Writes the cluster catalogue: each cluster is centred on the position
/// of its densest member tracer, named by the list file.
pub fn write_cluster_catalogue(
  ctx: &CentreContext<'_>,
  files: &WatershedFiles,
  edge_flags: &[i32],
) -> Result<(), PipelineError> {
  let list = read_pruned_list(&files.pruned_list())?;
  let rows = read_hierarchy(&files.pruned_hierarchy())?;
  let zones = read_zones(
    &files.raw_dir.join(format!("{}{}.zone", ctx.handle, StructureKind::Cluster.file_suffix())),
    Some(ctx.n_tracers),
  )?;
  let volumes = read_volumes(&files.raw_dir.join(format!("{}.trvol", ctx.handle)), Some(ctx.n_tracers))?;
  let densities: Vec<f64> = read_volumes(&files.raw_dir.join(format!("{}.vol", ctx.handle)), Some(ctx.n_tracers))?
    .iter()
    .map(|v| 1.0 / v)
    .collect();

  let cat_path = files.out_dir.join(format!("{}_cat.txt", files.prefix));
  let mut writer = BufWriter::new(File::create(&cat_path)?);
  writeln!(writer, "{}", catalogue_header(StructureKind::Cluster, list.len(), ctx.handle, ctx.is_box()))?;

  for (i, (row, hier)) in list.iter().zip(&rows).enumerate() {
    let member_zones = hier.all_zones();
    let members = member_tracers(&zones, &member_zones);
    let centre = ctx.tracers.position(row[1] as usize);

    let mut vol_sum = 0.0;
    let mut weighted_dens = 0.0;
    for &m in &members {
      vol_sum += volumes[m];
      weighted_dens += densities[m] * volumes[m];
    }
    let cluster_volume = vol_sum * ctx.mean_volume();
    let eff_rad = (3.0 * cluster_volume / (4.0 * std::f64::consts::PI)).cbrt();
    let avg_dens = weighted_dens / vol_sum;
    let lambda = (avg_dens - 1.0) * eff_rad.powf(StructureKind::Cluster.lambda_exponent());

    if let Some(geom) = &ctx.survey {
      // cluster centres are real tracer positions, so no leakage check
      let sky_pos = centre_to_sky(centre, eff_rad, ctx.box_length, geom, false);
      writeln!(
        writer,
        "{} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {}",
        row[0] as u32, sky_pos.ra, sky_pos.dec, sky_pos.redshift, eff_rad, row[2], avg_dens, lambda, row[7],
        sky_pos.ang_radius, edge_flags[i]
      )?;
    } else {
      writeln!(
        writer,
        "{} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6}",
        row[0] as u32, centre[0], centre[1], centre[2], eff_rad, row[2], avg_dens, lambda, row[7]
      )?;
    }
  }
  info!("wrote {} to {}", StructureKind::Cluster.label(), cat_path.display());
  Ok(())
}
