//! Host platform detection for the native engine.
//!
//! Native builds of the engine are published per CPU architecture and, on
//! amd64, per C library. [`Infrastructure`] resolves which variant folder
//! applies to the current host and [`load_native_library`] performs that
//! resolution exactly once per process.

use crate::core::constants::LIBC_ENV_VAR;
use crate::core::error::{ProviderError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// CPU architectures with a native build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CpuArchitecture {
    /// 64-bit ARM
    Aarch64,
    /// x86-64
    Amd64,
}

impl CpuArchitecture {
    /// Architecture of the running binary.
    pub fn current() -> Result<Self> {
        std::env::consts::ARCH.parse()
    }

    /// Folder holding this architecture's native builds.
    pub fn native_libs_folder(&self) -> &'static str {
        match self {
            CpuArchitecture::Aarch64 => "arm64",
            CpuArchitecture::Amd64 => "amd64",
        }
    }
}

impl FromStr for CpuArchitecture {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aarch64" | "arm64" => Ok(CpuArchitecture::Aarch64),
            "amd64" | "x86_64" => Ok(CpuArchitecture::Amd64),
            _ => {
                log::error!("Trying to use LightGBM on an unsupported architecture {}.", s);
                Err(ProviderError::unsupported_platform(format!(
                    "unsupported CPU architecture '{}'",
                    s
                )))
            }
        }
    }
}

impl fmt::Display for CpuArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuArchitecture::Aarch64 => write!(f, "AARCH64"),
            CpuArchitecture::Amd64 => write!(f, "AMD64"),
        }
    }
}

/// C library flavours with a native build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LibcImplementation {
    /// GNU libc
    #[default]
    Glibc,
    /// musl libc
    Musl,
}

impl LibcImplementation {
    /// Flavour named by an optional setting; unset or empty means glibc.
    pub fn from_setting(value: Option<&str>) -> Result<Self> {
        match value.map(str::trim) {
            None | Some("") => Ok(LibcImplementation::Glibc),
            Some(value) => value.parse(),
        }
    }

    /// Flavour selected by the `FDZ_OPENML_JAVA_LIBC` environment variable.
    pub fn from_env() -> Result<Self> {
        let value = std::env::var(LIBC_ENV_VAR).ok();
        Self::from_setting(value.as_deref())
    }

    /// Folder name of this flavour.
    pub fn name(&self) -> &'static str {
        match self {
            LibcImplementation::Glibc => "glibc",
            LibcImplementation::Musl => "musl",
        }
    }
}

impl FromStr for LibcImplementation {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "glibc" => Ok(LibcImplementation::Glibc),
            "musl" => Ok(LibcImplementation::Musl),
            _ => {
                log::error!("Trying to use LightGBM with an unsupported libc implementation {}.", s);
                Err(ProviderError::unsupported_platform(format!(
                    "unsupported libc implementation '{}'",
                    s
                )))
            }
        }
    }
}

/// A host's architecture and C library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Infrastructure {
    /// CPU architecture
    pub cpu_architecture: CpuArchitecture,
    /// C library flavour
    pub libc_implementation: LibcImplementation,
}

impl Infrastructure {
    /// Pair an architecture with a C library.
    pub fn new(cpu_architecture: CpuArchitecture, libc_implementation: LibcImplementation) -> Self {
        Infrastructure {
            cpu_architecture,
            libc_implementation,
        }
    }

    /// The running host.
    pub fn detect() -> Result<Self> {
        Ok(Self::new(CpuArchitecture::current()?, LibcImplementation::from_env()?))
    }

    /// Relative folder of the native build for this host, with a trailing `/`.
    ///
    /// arm64 builds exist for glibc only.
    pub fn native_libs_folder(&self) -> Result<String> {
        match (self.cpu_architecture, self.libc_implementation) {
            (CpuArchitecture::Aarch64, LibcImplementation::Musl) => Err(ProviderError::unsupported_platform(
                "Trying to use LightGBM on a musl-based OS with unsupported arm64 architecture.",
            )),
            (CpuArchitecture::Aarch64, _) => Ok(format!("{}/", self.cpu_architecture.native_libs_folder())),
            (CpuArchitecture::Amd64, libc) => Ok(format!(
                "{}/{}/",
                self.cpu_architecture.native_libs_folder(),
                libc.name()
            )),
        }
    }
}

impl fmt::Display for Infrastructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} with {}",
            self.cpu_architecture,
            self.libc_implementation.name()
        )
    }
}

static NATIVE_LIBRARY: OnceLock<std::result::Result<Infrastructure, String>> = OnceLock::new();

/// Resolve the native build for this host, once per process.
///
/// The engine is linked into this crate, so loading amounts to checking the
/// host has a supported variant. Later calls return the first outcome.
pub fn load_native_library() -> Result<Infrastructure> {
    let outcome = NATIVE_LIBRARY.get_or_init(|| {
        let infrastructure = Infrastructure::detect().map_err(|e| e.to_string())?;
        let folder = infrastructure.native_libs_folder().map_err(|e| e.to_string())?;
        log::info!(
            "Loaded LightGBM libs from variant {} ({}, {} CPUs).",
            folder,
            infrastructure,
            num_cpus::get()
        );
        Ok(infrastructure)
    });
    outcome.clone().map_err(|message| {
        log::error!("Failed to load LightGBM native library: {}", message);
        ProviderError::unsupported_platform(message)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_architecture_parsing() {
        assert_eq!("x86_64".parse::<CpuArchitecture>().unwrap(), CpuArchitecture::Amd64);
        assert_eq!("AMD64".parse::<CpuArchitecture>().unwrap(), CpuArchitecture::Amd64);
        assert_eq!("aarch64".parse::<CpuArchitecture>().unwrap(), CpuArchitecture::Aarch64);
        assert_eq!("Arm64".parse::<CpuArchitecture>().unwrap(), CpuArchitecture::Aarch64);
        assert!("sparc".parse::<CpuArchitecture>().is_err());
    }

    #[test]
    fn test_libc_setting() {
        assert_eq!(LibcImplementation::from_setting(None).unwrap(), LibcImplementation::Glibc);
        assert_eq!(LibcImplementation::from_setting(Some("")).unwrap(), LibcImplementation::Glibc);
        assert_eq!(LibcImplementation::from_setting(Some("MUSL")).unwrap(), LibcImplementation::Musl);
        let err = LibcImplementation::from_setting(Some("uclibc")).unwrap_err();
        assert_eq!(err.category(), "unsupported_platform");
    }

    #[test]
    fn test_native_libs_folder() {
        let folder = |arch, libc| Infrastructure::new(arch, libc).native_libs_folder();
        assert_eq!(folder(CpuArchitecture::Amd64, LibcImplementation::Glibc).unwrap(), "amd64/glibc/");
        assert_eq!(folder(CpuArchitecture::Amd64, LibcImplementation::Musl).unwrap(), "amd64/musl/");
        assert_eq!(folder(CpuArchitecture::Aarch64, LibcImplementation::Glibc).unwrap(), "arm64/");
        assert!(folder(CpuArchitecture::Aarch64, LibcImplementation::Musl).is_err());
    }

    #[test]
    fn test_display() {
        let infra = Infrastructure::new(CpuArchitecture::Amd64, LibcImplementation::Musl);
        assert_eq!(infra.to_string(), "AMD64 with musl");
    }
}
