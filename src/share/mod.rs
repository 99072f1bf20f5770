//! Share links.
//!
//! A share link is a capability: anyone holding the token (and the file's
//! password) may download the file, subject to an optional expiry and an
//! optional download cap.

mod link;
mod manager;

pub use link::{NewShareLink, ShareLink, ShareLinkRepository};
pub use manager::{ShareDownload, ShareLinkManager, MAX_EXPIRY_MINUTES, TOKEN_BYTES};
