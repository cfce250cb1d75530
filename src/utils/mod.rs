pub mod constants;
pub mod timestamp_utils;
pub mod url_utils;

pub use constants::*;
pub use url_utils::{Fingerprint, fingerprint, normalize_url};
