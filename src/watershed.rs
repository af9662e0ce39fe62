//! Pruning of the raw merged zone hierarchy into a disjoint set of
//! structures.
//!
//! Merging is deliberately disabled: no objective criterion exists to
//! control it, so every accepted seed contributes exactly its own zone.
//! The merge machinery is retained structurally (threshold parameters and
//! the step walk) so the pruning loop matches the full hierarchy format.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;

use crate::deser::hierarchy::{self, format_pruned_row};
use crate::deser::vol::read_volumes;
use crate::deser::zone::read_zones;
use crate::error::PipelineError;
use crate::tess::StructureKind;

/// Density ratio above which a structure is considered entirely
/// surrounded by edge-contaminated cells.
const EDGE_RATIO_LIMIT: f64 = 1e20;

/// User-facing pruning thresholds for one structure class.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
  /// Upper bound on the core density of a void seed, or lower bound on
  /// the core density of a cluster seed.
  pub core_dens_cut: f64,
  /// Minimum number of particles in the seed zone.
  pub min_num_parts: u64,
}

/// Locations of the raw inputs and the pruned outputs.
#[derive(Debug, Clone)]
pub struct WatershedFiles {
  pub raw_dir: PathBuf,
  pub handle: String,
  pub out_dir: PathBuf,
  pub prefix: String,
}

impl WatershedFiles {
  fn raw(&self, kind: StructureKind, ext: &str) -> PathBuf {
    self.raw_dir.join(format!("{}{}{}", self.handle, kind.file_suffix(), ext))
  }

  /// Raw per-tracer volume files are shared by both structure classes.
  fn raw_shared(&self, ext: &str) -> PathBuf {
    self.raw_dir.join(format!("{}{}", self.handle, ext))
  }

  pub fn pruned_hierarchy(&self) -> PathBuf {
    self.out_dir.join(format!("{}.void", self.prefix))
  }

  pub fn pruned_list(&self) -> PathBuf {
    self.out_dir.join(format!("{}_list.txt", self.prefix))
  }
}

/// Per-structure results carried forward to centre extraction.
#[derive(Debug)]
pub struct WatershedOutcome {
  pub n_accepted: usize,
  pub edge_flags: Vec<i32>,
  pub wtd_avg_dens: Vec<f64>,
}

/// Prunes the raw hierarchy of one structure class into disjoint
/// single-zone structures and writes the new hierarchy and list files.
pub fn postprocess(
  kind: StructureKind,
  files: &WatershedFiles,
  thresholds: Thresholds,
  n_tracers: usize,
  n_total: usize,
  n_non_edge: usize,
  box_length: f64,
) -> Result<WatershedOutcome, PipelineError> {
  info!("post-processing {}", kind.label());

  let candidates = hierarchy::read_candidates(&files.raw(kind, ".txt"))?;
  let rows = hierarchy::read_hierarchy(&files.raw(kind, ".void"))?;
  if rows.len() != candidates.len() {
    return Err(PipelineError::UnequalStructureCounts {
      hierarchy: rows.len(),
      list: candidates.len(),
    });
  }
  let zones = read_zones(&files.raw(kind, ".zone"), Some(n_tracers))?;
  let volumes = read_volumes(&files.raw_shared(".trvol"), Some(n_tracers))?;
  let densities: Vec<f64> = read_volumes(&files.raw_shared(".vol"), Some(n_tracers))?
    .iter()
    .map(|v| 1.0 / v)
    .collect();

  // candidates ordered by core density: deepest voids (or densest
  // clusters) claim their zones first
  let mut order: Vec<usize> = (0..candidates.len()).collect();
  match kind {
    StructureKind::Void => {
      order.sort_by(|&a, &b| candidates[a].core_density.total_cmp(&candidates[b].core_density))
    }
    StructureKind::Cluster => {
      order.sort_by(|&a, &b| candidates[b].core_density.total_cmp(&candidates[a].core_density))
    }
  }

  // mean volume per particle in the box, including all buffer mocks
  let meanvol = box_length.powi(3) / n_total as f64;

  let mut new_hierarchy_lines = Vec::new();
  let mut new_list_lines = Vec::new();
  let mut edge_flags = Vec::new();
  let mut wtd_avg_dens = Vec::new();

  for &idx in &order {
    let cand = &candidates[idx];
    let row = &rows[idx];
    let first_ratio = row.first_ratio();

    let passes_density = match kind {
      StructureKind::Void => cand.core_density < thresholds.core_dens_cut,
      StructureKind::Cluster => cand.core_density > thresholds.core_dens_cut,
    };
    if first_ratio < 1.0 || !passes_density || cand.zone_num_parts < thresholds.min_num_parts {
      continue;
    }

    // no merging: the structure is exactly the seed zone, and growth
    // stops at the first would-be merge; with no recorded merges the
    // list-file ratio stands
    let r_stop = row.steps.first().map(|s| s.ratio).unwrap_or(cand.density_ratio);
    let member_zone = row.seed;
    let total_vol = cand.zone_volume;
    let total_parts = cand.zone_num_parts;

    // volume-weighted mean density over the member cells
    let mut vol_sum = 0.0;
    let mut weighted = 0.0;
    for i in 0..n_tracers {
      if zones[i] == member_zone {
        vol_sum += volumes[i];
        weighted += volumes[i] * densities[i];
      }
    }
    let avg_dens = if vol_sum > 0.0 { weighted / vol_sum } else { 0.0 };
    wtd_avg_dens.push(avg_dens);

    // a structure bordering an edge-contaminated zone inherits the flag
    // from the zones its first (refused) merge step names
    let first_step_zones: &[u32] = row.steps.first().map(|s| s.zones.as_slice()).unwrap_or(&[]);
    let touches_edge = candidates
      .iter()
      .any(|c| c.edge_flag == 1 && first_step_zones.contains(&c.zone_id));
    edge_flags.push(if touches_edge { 1 } else { 0 });

    new_hierarchy_lines.push(format_pruned_row(member_zone, r_stop));
    let reported_ratio = if r_stop > EDGE_RATIO_LIMIT { -1.0 } else { r_stop };
    new_list_lines.push(format!(
      "{} {} {:.6} {} {} {} {:.6} {:.6}",
      cand.zone_id,
      cand.core_particle,
      cand.core_density,
      cand.zone_num_parts,
      1, // member zones: always just the seed
      total_parts,
      total_vol * meanvol,
      reported_ratio,
    ));
  }

  let n_accepted = new_hierarchy_lines.len();
  let mut hier_writer = BufWriter::new(File::create(files.pruned_hierarchy())?);
  writeln!(hier_writer, "{}", n_accepted)?;
  for line in &new_hierarchy_lines {
    writeln!(hier_writer, "{}", line)?;
  }

  let mut list_writer = BufWriter::new(File::create(files.pruned_list())?);
  writeln!(
    list_writer,
    "# {} non-edge tracers in {}, {} {}",
    n_non_edge,
    files.handle,
    n_accepted,
    kind.label()
  )?;
  match kind {
    StructureKind::Void => writeln!(
      list_writer,
      "# VoidID CoreParticle CoreDens Zone#Parts Void#Zones Void#Parts VoidVol(Mpc/h^3) VoidDensRatio"
    )?,
    StructureKind::Cluster => writeln!(
      list_writer,
      "# ClusterID CoreParticle CoreDens Zone#Parts Cluster#Zones Cluster#Parts ClusterVol(Mpc/h^3) ClusterDensRatio"
    )?,
  }
  for line in &new_list_lines {
    writeln!(list_writer, "{}", line)?;
  }

  info!("{} {} accepted out of {} candidates", n_accepted, kind.label(), candidates.len());
  Ok(WatershedOutcome {
    n_accepted,
    edge_flags,
    wtd_avg_dens,
  })
}

/// Reads back a pruned list file: one row of numeric columns per
/// structure, headers skipped.
pub fn read_pruned_list(path: &Path) -> Result<Vec<Vec<f64>>, PipelineError> {
  let content = std::fs::read_to_string(path)?;
  let mut rows = Vec::new();
  for line in content.lines() {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
      continue;
    }
    let row: Result<Vec<f64>, _> = trimmed.split_whitespace().map(|t| t.parse::<f64>()).collect();
    rows.push(row.map_err(|_| PipelineError::malformed("structure list", path, format!("bad row '{}'", trimmed)))?);
  }
  Ok(rows)
}

#[cfg(test)]
mod tests {
  use crate::deser::vol::write_volumes;
  use crate::tess::EDGE_VOLUME_SENTINEL;

  use super::*;

  /// Lays down a raw file set with three zones: a deep void zone (0), a
  /// middling zone (1) flagged as edge-contaminated, and a dense zone (2).
  fn write_fixture(dir: &Path) -> WatershedFiles {
    let handle = "t";
    // 6 tracers, zones 0,0,1,1,2,2
    std::fs::write(dir.join("t.zone"), "6\n0\n0\n1\n1\n2\n2\n").unwrap();
    write_volumes(&dir.join("t.trvol"), &[2.0, 1.5, 1.0, 1.0, 0.5, 0.25]).unwrap();
    // densities are reciprocals of these
    write_volumes(&dir.join("t.vol"), &[4.0, 2.0, 1.0, 1.0, 0.5, 0.2]).unwrap();
    std::fs::write(
      dir.join("t.txt"),
      "header\nheader\n\
       0 0 0 0.25 3.5 2 1 3.5 2 2.5 0.0\n\
       1 1 2 1.00 2.0 2 1 2.0 2 1.8 0.0\n\
       2 0 5 5.00 0.75 2 1 0.75 2 1.2 0.0\n",
    )
    .unwrap();
    std::fs::write(
      dir.join("t.void"),
      "3\n\
       0 1 2.5 1 0 1e30\n\
       1 1 1.8 2 0 1e30\n\
       2 1 1.2 1 0 1e30\n",
    )
    .unwrap();
    WatershedFiles {
      raw_dir: dir.to_path_buf(),
      handle: handle.to_string(),
      out_dir: dir.to_path_buf(),
      prefix: "voids".to_string(),
    }
  }

  #[test]
  fn void_pruning_orders_and_filters() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_fixture(dir.path());
    let out = postprocess(
      StructureKind::Void,
      &files,
      Thresholds { core_dens_cut: 1.0, min_num_parts: 1 },
      6,
      8,
      6,
      10.0,
    )
    .unwrap();
    // only zone 0 has core density below 1
    assert_eq!(out.n_accepted, 1);
    // zone 0 borders edge-flagged zone 1 through its first merge step
    assert_eq!(out.edge_flags, vec![1]);
    // weighted mean density over members 0 and 1:
    // (2.0 * 0.25 + 1.5 * 0.5) / 3.5
    assert!((out.wtd_avg_dens[0] - 1.25 / 3.5).abs() < 1e-12);

    let list = read_pruned_list(&files.pruned_list()).unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0][0], 0.0); // zone id
    assert_eq!(list[0][1], 0.0); // core particle
    assert_eq!(list[0][4], 1.0); // single member zone
    // volume scaled by the box mean volume per particle
    assert!((list[0][6] - 3.5 * 1000.0 / 8.0).abs() < 1e-6);
    assert_eq!(list[0][7], 2.5);

    let rows = hierarchy::read_hierarchy(&files.pruned_hierarchy()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].seed, 0);
    assert!(rows[0].steps.is_empty());
    assert_eq!(rows[0].r_stop, 2.5);
  }

  #[test]
  fn cluster_pruning_flips_the_density_sense() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_fixture(dir.path());
    // reuse the void-side fixture as the cluster-side raw files
    for ext in [".txt", ".void", ".zone"] {
      std::fs::copy(dir.path().join(format!("t{}", ext)), dir.path().join(format!("t_c{}", ext))).unwrap();
    }
    let out = postprocess(
      StructureKind::Cluster,
      &files,
      Thresholds { core_dens_cut: 1.0, min_num_parts: 2 },
      6,
      8,
      6,
      10.0,
    )
    .unwrap();
    // only zone 2 has core density above 1
    assert_eq!(out.n_accepted, 1);
    let list = read_pruned_list(&files.pruned_list()).unwrap();
    assert_eq!(list[0][0], 2.0);
    assert_eq!(list[0][2], 5.0);
  }

  #[test]
  fn disjoint_zones_across_structures() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_fixture(dir.path());
    // admit everything
    let out = postprocess(
      StructureKind::Void,
      &files,
      Thresholds { core_dens_cut: 1e30, min_num_parts: 1 },
      6,
      8,
      6,
      10.0,
    )
    .unwrap();
    assert_eq!(out.n_accepted, 3);
    let rows = hierarchy::read_hierarchy(&files.pruned_hierarchy()).unwrap();
    let mut seeds: Vec<u32> = rows.iter().map(|r| r.seed).collect();
    seeds.sort_unstable();
    seeds.dedup();
    assert_eq!(seeds.len(), 3, "zones must not repeat across structures");
    // ordering: ascending core density
    let list = read_pruned_list(&files.pruned_list()).unwrap();
    assert!(list.windows(2).all(|w| w[0][2] <= w[1][2]));
  }

  #[test]
  fn huge_stop_ratio_reports_minus_one() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_fixture(dir.path());
    // rewrite the raw files so the qualifying zone has no recorded
    // merges and a list-file ratio beyond the edge limit
    std::fs::write(dir.path().join("t.void"), "3\n0 0 1e30\n1 0 1e30\n2 0 1e30\n").unwrap();
    std::fs::write(
      dir.path().join("t.txt"),
      "header\nheader\n\
       0 0 0 0.25 3.5 2 1 3.5 2 1e30 0.0\n\
       1 1 2 1.00 2.0 2 1 2.0 2 1e30 0.0\n\
       2 0 5 5.00 0.75 2 1 0.75 2 1e30 0.0\n",
    )
    .unwrap();
    let out = postprocess(
      StructureKind::Void,
      &files,
      Thresholds { core_dens_cut: 1.0, min_num_parts: 1 },
      6,
      8,
      6,
      10.0,
    )
    .unwrap();
    assert_eq!(out.n_accepted, 1);
    // no merge step names any zone, so no edge flag is inherited
    assert_eq!(out.edge_flags, vec![0]);
    let list = read_pruned_list(&files.pruned_list()).unwrap();
    assert_eq!(list[0][7], -1.0);
    // the hierarchy file keeps the raw ratio
    let rows = hierarchy::read_hierarchy(&files.pruned_hierarchy()).unwrap();
    assert_eq!(rows[0].r_stop, 1e30);
  }

  #[test]
  fn sentinel_volume_input_still_reads() {
    // edge-contaminated densities in the .vol file must not break the
    // weighted averages of structures that exclude them
    let dir = tempfile::tempdir().unwrap();
    let files = write_fixture(dir.path());
    write_volumes(
      &dir.path().join("t.vol"),
      &[4.0, 2.0, EDGE_VOLUME_SENTINEL, EDGE_VOLUME_SENTINEL, 0.5, 0.2],
    )
    .unwrap();
    let out = postprocess(
      StructureKind::Void,
      &files,
      Thresholds { core_dens_cut: 1.0, min_num_parts: 1 },
      6,
      8,
      4,
      10.0,
    )
    .unwrap();
    assert_eq!(out.n_accepted, 1);
    assert!((out.wtd_avg_dens[0] - 1.25 / 3.5).abs() < 1e-12);
  }
}
