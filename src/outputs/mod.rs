//! Output generation modules for Markdown documents, snapshots and the index.
//!
//! # Submodules
//!
//! - [`markdown`]: renders an [`Article`](crate::models::Article) as a Markdown
//!   document with YAML front-matter, and parses it back
//! - [`json`]: dated JSON snapshots handed between the step-wise CLI commands
//! - [`indexes`]: maintains `INDEX.md` in the articles directory
//!
//! # Output Structure
//!
//! ```text
//! articles_dir/
//! ├── 2025-10-03-openai-and-amd-sign-a-compute-deal.md
//! ├── images/
//! │   └── 2025-10-03-openai-and-amd-sign-a-compute-deal.png
//! └── INDEX.md
//!
//! data_dir/
//! ├── discovered-2025-10-03.json
//! └── ranked-2025-10-03.json
//! ```

pub mod indexes;
pub mod json;
pub mod markdown;
