//! # stock-meta
//!
//! AI-powered stock photography metadata — send batches of images to Google
//! Gemini, collect SEO-optimized titles, categories, and keywords, and export
//! the results as platform-specific CSV (Adobe Stock, Shutterstock, Freepik)
//! or JSON.
//!
//! ## Quick Start
//!
//! The batch coordinator drives the whole flow: encode each image, request
//! metadata with bounded concurrency, post-process the results, and stream
//! progress events to a channel while the export text is assembled:
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use stock_meta::ai::{Constraints, GeminiService};
//! use stock_meta::batch::{self, ImageItem};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let service = GeminiService::new(
//!         "AIza...".into(),
//!         "gemini-2.0-flash".into(),
//!         Duration::from_secs(60),
//!     );
//!
//!     let items = vec![ImageItem {
//!         filename: "beach.jpg".into(),
//!         mime_type: "image/jpeg".into(),
//!         bytes: std::fs::read("beach.jpg")?,
//!     }];
//!
//!     let (tx, mut rx) = mpsc::channel::<batch::Event>(32);
//!     let consumer = tokio::spawn(async move {
//!         while let Some(event) = rx.recv().await {
//!             print!("{}", event.to_ndjson());
//!         }
//!     });
//!
//!     let constraints = Constraints::default();
//!     let report = batch::run_batch(&service, items, &constraints, 5, 100, &tx).await;
//!     drop(tx);
//!     consumer.await?;
//!
//!     println!("{} processed, {} failed", report.counters.total, report.counters.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`ai`] — metadata types, prompt construction, response parsing, and the
//!   Gemini service
//! - [`batch`] — bounded-concurrency batch coordinator and progress events
//! - [`config`] — configuration types and loading/saving
//! - [`error`] — error taxonomy
//! - [`export`] — platform CSV/JSON export presets
//! - [`http`] — axum router for the batch-stream and single-image endpoints

pub mod ai;
pub mod batch;
pub mod config;
pub mod error;
pub mod export;
pub mod http;
