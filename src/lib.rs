//! # Relay Buffer
//!
//! An append-only segmented buffer: the recording surface a multicast relay
//! uses to keep the values it has emitted so that late subscribers can be
//! replayed and live values can be fanned out.
//!
//! The buffer is a singly linked chain of fixed-size segments. It grows by
//! linking a new segment when the tail is full, never by copying, so every
//! stored value keeps its address for the lifetime of the buffer.
//!
//! ## Concurrency
//!
//! - **One writer.** [`AppendOnlyBuffer::append`] takes `&mut self`. A relay
//!   emitting from several threads wraps the buffer in its own lock.
//!
//! - **Any number of readers.** Traversals ([`scan_until`], [`for_each`],
//!   [`iter`]) take `&self`, and [`BufferReader`] handles share the chain
//!   across threads without locking. They run concurrently with the writer
//!   and always observe an in-order prefix of what was appended.
//!
//! - **No blocking.** Nothing parks, spins or waits. Every call finishes in
//!   time proportional to the values it touches.
//!
//! [`scan_until`]: AppendOnlyBuffer::scan_until
//! [`for_each`]: AppendOnlyBuffer::for_each
//! [`iter`]: AppendOnlyBuffer::iter
//!
//! ## Example
//!
//! ```
//! use relay_buffer::{AppendOnlyBuffer, Termination};
//!
//! let mut buffer = AppendOnlyBuffer::new(2);
//! let reader = buffer.reader();
//! for v in ["a", "b", "c"] {
//!     buffer.append(v);
//! }
//!
//! let mut replayed = Vec::new();
//! reader.for_each(|v| replayed.push(*v));
//! assert_eq!(replayed, ["a", "b", "c"]);
//! assert_eq!(reader.scan_until(|v| *v == "b"), Termination::Matched);
//! ```
//!
//! ## Modules
//!
//! - [`append_only`]: [`AppendOnlyBuffer`], [`BufferReader`] and the
//!   traversal types.
//! - [`config`]: [`BufferConfig`] for building buffers from configuration.
//! - [`error`]: [`BufferError`].
//! - [`utils`]: Timing helpers for the latency demo.
//!
//! ## License
//!
//! Licensed under the terms of the **GNU Lesser General Public License**,
//! version 3.0, or (at your option) any later version.
//!
//! See <https://www.gnu.org/licenses/lgpl-3.0.html> for details.

pub mod append_only;
pub mod config;
pub mod error;
mod segment;
pub mod utils;

pub use append_only::{AppendOnlyBuffer, BufferReader, Iter, Sink, Termination};
pub use config::BufferConfig;
pub use error::{BufferError, Result};
pub use utils::{Samples, Summary};
#[cfg(unix)]
pub use utils::mono_time_ns;
