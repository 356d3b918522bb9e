//! Element types and device classification shared across the crate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Numeric element types the tuner calibrates for.
///
/// The derived `Ord` follows the lexicographic order of the type names
/// (`double` < `float`); sweeps, reports and cache files all rely on that
/// order being stable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    Double,
    Float,
}

impl Dtype {
    /// Every supported dtype, in lexicographic name order.
    pub const ALL: [Dtype; 2] = [Dtype::Double, Dtype::Float];

    /// Name used as a JSON key in calibration records.
    pub fn as_str(self) -> &'static str {
        match self {
            Dtype::Double => "double",
            Dtype::Float => "float",
        }
    }

    /// Size of one element in bytes.
    pub fn elem_bytes(self) -> u64 {
        match self {
            Dtype::Double => 8,
            Dtype::Float => 4,
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a record key does not name a known dtype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDtype(pub String);

impl fmt::Display for UnknownDtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown dtype \"{}\"", self.0)
    }
}

impl std::error::Error for UnknownDtype {}

impl FromStr for Dtype {
    type Err = UnknownDtype;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "double" => Ok(Dtype::Double),
            "float" => Ok(Dtype::Float),
            other => Err(UnknownDtype(other.to_string())),
        }
    }
}

/// Broad class of the underlying compute resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Cpu,
    Gpu,
    Hybrid,
}

impl DeviceClass {
    pub fn is_cpu(self) -> bool {
        matches!(self, DeviceClass::Cpu)
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceClass::Cpu => "CPU",
            DeviceClass::Gpu => "GPU",
            DeviceClass::Hybrid => "Hybrid",
        };
        f.write_str(name)
    }
}
