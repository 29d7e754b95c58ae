//! Address allow-list for incoming advertisements.
//!
//! The filter is built once at startup from a single specification string:
//!
//! - empty: every address is accepted
//! - anything else: only the listed addresses are accepted, so a list with no
//!   entries accepts nothing
//! - `AA:BB:CC:DD:EE:FF,11-22-33-44-55-66`: inline comma-separated list
//! - `file:/etc/ble-sensor-exporter/allow.list`: line-delimited list, blank
//!   lines and `#` comments ignored
//!
//! Entries and tested addresses go through [`normalize`] so case and dash/colon
//! separators do not matter.

use crate::mac_address::MacAddress;
use log::warn;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Prefix marking a specification that refers to a file.
pub const FILE_PREFIX: &str = "file:";

/// Errors returned while building an [`AddressFilter`].
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("cannot read address list {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Canonical form of an address: trimmed, uppercase, colon-separated.
///
/// Malformed input is not rejected; it is normalized as far as possible and
/// will simply never match a well-formed address.
pub fn normalize(address: &str) -> String {
    address.trim().to_uppercase().replace('-', ":")
}

/// Allow-list of device addresses.
#[derive(Debug, Clone)]
pub struct AddressFilter {
    addresses: HashSet<String>,
    allow_all: bool,
}

impl AddressFilter {
    /// A filter that accepts every address.
    pub fn allow_all() -> Self {
        Self {
            addresses: HashSet::new(),
            allow_all: true,
        }
    }

    /// Build a filter from an inline list or a `file:` reference.
    ///
    /// # Errors
    /// Returns [`FilterError::Read`] when the referenced file cannot be read.
    pub fn from_spec(spec: &str) -> Result<Self, FilterError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Ok(Self::allow_all());
        }

        let filter = match spec.strip_prefix(FILE_PREFIX) {
            Some(path) => {
                let path = PathBuf::from(path.trim());
                let contents = fs::read_to_string(&path)
                    .map_err(|source| FilterError::Read { path, source })?;
                Self::from_lines(&contents)
            }
            None => Self::from_entries(spec.split(',')),
        };

        if filter.is_empty() {
            warn!("address filter '{spec}' has no entries, no advertisement will be accepted");
        }

        Ok(filter)
    }

    fn from_lines(contents: &str) -> Self {
        Self::from_entries(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.starts_with('#'))
                .flat_map(|line| line.split(',')),
        )
    }

    fn from_entries<'a>(entries: impl Iterator<Item = &'a str>) -> Self {
        let addresses = entries
            .map(normalize)
            .filter(|entry| !entry.is_empty())
            .inspect(|entry| {
                if let Err(e) = entry.parse::<MacAddress>() {
                    warn!("address filter entry '{entry}' will never match: {e}");
                }
            })
            .collect();
        Self {
            addresses,
            allow_all: false,
        }
    }

    /// Whether advertisements from `address` should be processed.
    pub fn matches(&self, address: &str) -> bool {
        self.allow_all || self.addresses.contains(&normalize(address))
    }

    /// True when the filter accepts every address.
    pub fn accepts_all(&self) -> bool {
        self.allow_all
    }

    /// True when no address is listed.
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Number of distinct normalized entries.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }
}
