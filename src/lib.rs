//! # Awful Newsroom
//!
//! A content-generation pipeline that asks an LLM for trending topics,
//! filters and ranks them, researches the best candidate, drafts a long-form
//! article with a corrective loop, illustrates it and persists/publishes the
//! result.
//!
//! ## Architecture
//!
//! The pipeline runs as a single sequential task:
//! 1. **Discover**: one web-search-capable LLM call returns candidate topics
//!    ([`discovery`]), which are validated and de-duplicated against past
//!    articles ([`topics`]); empty outcomes trigger a new discovery
//! 2. **Score**: deterministic ranking with a threshold gate ([`scoring`])
//! 3. **Research**: an optional dossier enriches the chosen topic ([`research`])
//! 4. **Draft**: article assembly with validation and expansion retries ([`article`])
//! 5. **Illustrate**: thumbnail generation ([`thumbnail`])
//! 6. **Persist / Publish**: Markdown on disk ([`store`]), optional CMS sync ([`publish`])
//!
//! Every LLM answer that must be JSON goes through the tiered repairing
//! extractor in [`extract`]. External services sit behind the traits in
//! [`ports`] so the [`pipeline`] can be driven by in-memory stubs.

pub mod api;
pub mod article;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod models;
pub mod outputs;
pub mod pipeline;
pub mod ports;
pub mod prompts;
pub mod publish;
pub mod research;
pub mod scoring;
pub mod store;
pub mod thumbnail;
pub mod topics;
pub mod utils;
