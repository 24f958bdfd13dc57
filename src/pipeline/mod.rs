//! Pipeline stages for form extraction.
//!
//! Each submodule implements exactly one transformation step so each can be
//! tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ preprocess ──▶ analyze ──▶ normalize (+ phone)
//! (paths)   (binarize)     (service)   (fixed columns)
//! ```
//!
//! 1. [`input`]: resolve files, directories and URLs to `(name, bytes)`
//! 2. [`preprocess`]: Gaussian adaptive threshold, re-encoded as PNG; CPU-bound,
//!    so the batch driver runs it in `spawn_blocking`
//! 3. [`analyze`]: the service seam and response flattening; the only
//!    stage with network I/O
//! 4. [`normalize`]: static synonym table onto `Nome`/`Data`/`Fone`/`Cel`/`Address`
//! 5. [`phone`]: digit-count driven phone masks used by `normalize`

pub mod analyze;
pub mod input;
pub mod normalize;
pub mod phone;
pub mod preprocess;
