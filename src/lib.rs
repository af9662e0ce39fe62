//! Finds cosmic voids and superclusters in a catalogue of point tracers
//! (galaxies or simulation particles) by watershed post-processing of a
//! Voronoi tessellation density field (the ZOBOV algorithm).
//!
//! The tracer sample is either a periodic cubic simulation box or a sky
//! survey bounded by a HEALPix angular mask and a redshift range. The
//! tessellation itself is performed by external programs; this crate
//! conditions their inputs (coordinate conversion, cuts, buffer particle
//! synthesis), drives them, reweights the resulting cell volumes, prunes
//! the merged zone hierarchy into disjoint structures and extracts
//! structure centres and catalogues.
//!
//! The usual entry point is [`pipeline::Pipeline`] together with a
//! [`tess::Tessellator`] implementation such as
//! [`tess::ExternalTessellator`].

pub mod buffers;
pub mod centres;
pub mod cosmo;
pub mod deser;
pub mod error;
pub mod mask;
pub mod numeric;
pub mod pipeline;
pub mod reweight;
pub mod selection;
pub mod sky;
pub mod tess;
pub mod tracers;
pub mod watershed;
