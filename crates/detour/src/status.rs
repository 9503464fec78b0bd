//! Status codes for Detour operations
//!
//! A status packs one high level outcome (failure, success or in progress)
//! into the top bits and any number of detail flags into the low bits, so a
//! caller can test the outcome and the reason independently.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Result type for Detour operations. The error side always has
/// [`DtStatus::DT_FAILURE`] set.
pub type Result<T> = std::result::Result<T, DtStatus>;

/// Bitmask status returned by every fallible Detour operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct DtStatus(pub u32);

impl DtStatus {
    /// Operation failed
    pub const DT_FAILURE: u32 = 1u32 << 31;
    /// Operation succeeded
    pub const DT_SUCCESS: u32 = 1u32 << 30;
    /// Operation still in progress
    pub const DT_IN_PROGRESS: u32 = 1u32 << 29;

    /// Mask selecting the detail bits
    pub const DT_STATUS_DETAIL_MASK: u32 = 0x0ff_ffff;
    /// Input data is not recognized
    pub const DT_WRONG_MAGIC: u32 = 1 << 0;
    /// Input data is in wrong version
    pub const DT_WRONG_VERSION: u32 = 1 << 1;
    /// Operation ran out of memory
    pub const DT_OUT_OF_MEMORY: u32 = 1 << 2;
    /// An input parameter was invalid
    pub const DT_INVALID_PARAM: u32 = 1 << 3;
    /// Result buffer for the query was too small to store all results
    pub const DT_BUFFER_TOO_SMALL: u32 = 1 << 4;
    /// Query ran out of nodes during search
    pub const DT_OUT_OF_NODES: u32 = 1 << 5;
    /// Query did not reach the end location, returning best guess
    pub const DT_PARTIAL_RESULT: u32 = 1 << 6;
    /// A tile has already been assigned to the given x,y coordinate
    pub const DT_ALREADY_OCCUPIED: u32 = 1 << 7;

    /// Creates a new status with the given flags
    pub const fn new(flags: u32) -> Self {
        Self(flags)
    }

    /// Creates a success status
    pub const fn success() -> Self {
        Self(Self::DT_SUCCESS)
    }

    /// Creates a failure status
    pub const fn failure() -> Self {
        Self(Self::DT_FAILURE)
    }

    /// Creates a failure status with detail
    pub const fn failure_detail(detail: u32) -> Self {
        Self(Self::DT_FAILURE | detail)
    }

    /// Creates a success status with detail
    pub const fn success_detail(detail: u32) -> Self {
        Self(Self::DT_SUCCESS | detail)
    }

    /// Creates an in-progress status
    pub const fn in_progress() -> Self {
        Self(Self::DT_IN_PROGRESS)
    }

    /// Shorthand for `failure_detail(DT_INVALID_PARAM)`
    pub const fn invalid_param() -> Self {
        Self(Self::DT_FAILURE | Self::DT_INVALID_PARAM)
    }

    /// Returns true if status is success
    pub fn is_success(&self) -> bool {
        (self.0 & Self::DT_SUCCESS) != 0
    }

    /// Returns true if status is failure
    pub fn is_failure(&self) -> bool {
        (self.0 & Self::DT_FAILURE) != 0
    }

    /// Returns true if status is in progress
    pub fn is_in_progress(&self) -> bool {
        (self.0 & Self::DT_IN_PROGRESS) != 0
    }

    /// Returns true if specific detail is set
    pub fn has_detail(&self, detail: u32) -> bool {
        (self.0 & detail) != 0
    }

    /// Gets the detail bits
    pub fn detail(&self) -> u32 {
        self.0 & Self::DT_STATUS_DETAIL_MASK
    }

    /// Returns the raw bits
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Turns a failure status into `Err`, passing anything else through.
    pub fn into_result(self) -> Result<DtStatus> {
        if self.is_failure() {
            Err(self)
        } else {
            Ok(self)
        }
    }
}

impl BitOr<u32> for DtStatus {
    type Output = DtStatus;

    fn bitor(self, rhs: u32) -> DtStatus {
        DtStatus(self.0 | rhs)
    }
}

impl BitOr for DtStatus {
    type Output = DtStatus;

    fn bitor(self, rhs: DtStatus) -> DtStatus {
        DtStatus(self.0 | rhs.0)
    }
}

impl BitOrAssign<u32> for DtStatus {
    fn bitor_assign(&mut self, rhs: u32) {
        self.0 |= rhs;
    }
}

impl std::error::Error for DtStatus {}

impl fmt::Display for DtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            write!(f, "Success")?;
        } else if self.is_failure() {
            write!(f, "Failure")?;
        } else if self.is_in_progress() {
            write!(f, "In Progress")?;
        } else {
            write!(f, "Idle")?;
        }

        const NAMES: [(u32, &str); 8] = [
            (DtStatus::DT_WRONG_MAGIC, "Wrong Magic"),
            (DtStatus::DT_WRONG_VERSION, "Wrong Version"),
            (DtStatus::DT_OUT_OF_MEMORY, "Out of Memory"),
            (DtStatus::DT_INVALID_PARAM, "Invalid Param"),
            (DtStatus::DT_BUFFER_TOO_SMALL, "Buffer Too Small"),
            (DtStatus::DT_OUT_OF_NODES, "Out of Nodes"),
            (DtStatus::DT_PARTIAL_RESULT, "Partial Result"),
            (DtStatus::DT_ALREADY_OCCUPIED, "Already Occupied"),
        ];
        let details: Vec<&str> = NAMES
            .iter()
            .filter(|(bit, _)| self.has_detail(*bit))
            .map(|(_, name)| *name)
            .collect();

        if !details.is_empty() {
            write!(f, " ({})", details.join(", "))?;
        }

        Ok(())
    }
}
