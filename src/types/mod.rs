//! Core types for frames and field groups.
//!
//! - [`Frame`] is the immutable identifier + payload unit delivered by the peer radio
//! - [`GroupId`] names the seven logical groups and maps each to its frame identifier
//! - [`GroupReading`] holds the decoded values of one group
//!
//! ```rust
//! use cellgate::types::{Frame, GroupId};
//!
//! let frame = Frame::new(0x9000_8000, &[40, 41, 42, 43]).unwrap();
//! assert_eq!(frame.group(), Some(GroupId::Temperatures));
//! ```

mod frame;
mod group;

pub use frame::Frame;
pub use group::{GroupId, GroupReading, PackReading};
