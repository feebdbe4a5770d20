// src/types.rs
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of external hashing backend a session drives
///
/// Each kind maps to its own executable in the `[backends]` configuration
/// table. The supervisor never hashes itself.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// GPU miner using OpenCL kernels
    #[clap(name = "opencl")]
    OpenCl,

    /// GPU miner using CUDA kernels
    #[clap(name = "cuda")]
    Cuda,

    /// CPU miner
    #[clap(name = "cpu")]
    Cpu,
}

impl BackendKind {
    /// Whether the backend selects a device with `-d<index>`
    pub fn uses_device(&self) -> bool {
        matches!(self, BackendKind::OpenCl | BackendKind::Cuda)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::OpenCl => write!(f, "opencl"),
            BackendKind::Cuda => write!(f, "cuda"),
            BackendKind::Cpu => write!(f, "cpu"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "opencl" | "ocl" | "gpu" => Ok(BackendKind::OpenCl),
            "cuda" => Ok(BackendKind::Cuda),
            "cpu" => Ok(BackendKind::Cpu),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Where work comes from
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Remote mining pool; shares are credited by the pool
    #[clap(name = "pool")]
    Pool,

    /// Local full node; only full block solutions pay out
    #[clap(name = "solo")]
    Solo,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionMode::Pool => write!(f, "pool"),
            ConnectionMode::Solo => write!(f, "solo"),
        }
    }
}

impl FromStr for ConnectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pool" => Ok(ConnectionMode::Pool),
            "solo" | "node" => Ok(ConnectionMode::Solo),
            _ => Err(format!("Unknown connection mode: {}", s)),
        }
    }
}
