//! Readers and writers for the on-disk formats the pipeline exchanges with
//! the external tessellation and watershed programs, plus FITS support for
//! sky masks and survey catalogues.

pub mod adj;
pub mod fits;
pub mod gz;
pub mod hierarchy;
pub mod vol;
pub mod zone;
