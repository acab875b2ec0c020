use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse CPU architecture used to pick the bundled server binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// AArch64
    Arm64,
    /// 32-bit ARM (armeabi-v7a and older)
    Arm32,
    /// x86_64
    X64,
    /// 32-bit x86
    X86,
}

impl Architecture {
    /// Resolve the architecture from a host-ordered list of supported ABIs.
    ///
    /// The first ABI that matches a known prefix wins, so the host's own
    /// preference order is respected. Falls back to `Arm64` when nothing matches.
    ///
    /// ```
    /// use upload_supervisor::server::Architecture;
    ///
    /// assert_eq!(Architecture::resolve(&["x86_64", "x86"]), Architecture::X64);
    /// assert_eq!(Architecture::resolve(&["armeabi-v7a"]), Architecture::Arm32);
    /// assert_eq!(Architecture::resolve::<&str>(&[]), Architecture::Arm64);
    /// ```
    pub fn resolve<S: AsRef<str>>(abis: &[S]) -> Self {
        abis.iter()
            .find_map(|abi| Self::from_abi(abi.as_ref()))
            .unwrap_or(Architecture::Arm64)
    }

    /// Classify a single ABI name, if it is recognised at all
    pub fn from_abi(abi: &str) -> Option<Self> {
        // arm64 must be checked before the plain "arm" prefix
        if abi.starts_with("arm64") {
            Some(Architecture::Arm64)
        } else if abi.starts_with("armeabi-v7a") || abi.starts_with("arm") {
            Some(Architecture::Arm32)
        } else if abi.starts_with("x86_64") {
            Some(Architecture::X64)
        } else if abi.starts_with("x86") {
            Some(Architecture::X86)
        } else {
            None
        }
    }

    /// Short tag: `arm64`, `arm32`, `x64` or `x86`
    pub fn tag(&self) -> &'static str {
        match self {
            Architecture::Arm64 => "arm64",
            Architecture::Arm32 => "arm32",
            Architecture::X64 => "x64",
            Architecture::X86 => "x86",
        }
    }

    /// Asset path of the prebuilt server binary for this architecture.
    ///
    /// Only three variants are bundled; x86 hosts get the default arm64 build.
    pub fn asset_path(&self) -> &'static str {
        match self {
            Architecture::Arm32 => "server/libserver_arm32.so",
            Architecture::X64 => "server/libserver_x64.so",
            Architecture::Arm64 | Architecture::X86 => "server/libserver_arm64.so",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// ABIs supported by the running host, most preferred first.
///
/// Uses Android ABI names so the same resolution rules apply on and off device.
pub fn host_abis() -> Vec<String> {
    let abis: &[&str] = match std::env::consts::ARCH {
        "aarch64" => &["arm64-v8a", "armeabi-v7a", "armeabi"],
        "arm" => &["armeabi-v7a", "armeabi"],
        "x86_64" => &["x86_64", "x86"],
        "x86" => &["x86"],
        other => return vec![other.to_string()],
    };
    abis.iter().map(|abi| abi.to_string()).collect()
}
