use crate::error::{Result, SourceCheckError};
use std::fmt;
use std::str::FromStr;

const LINUX_PROFILE: &str = "[settings]\narch=x86_64\narch_build=x86_64\nbuild_type=Release\ncompiler=gcc\ncompiler.libcxx=libstdc++\ncompiler.version=11\nos=Linux\nos_build=Linux\n[options]\n[build_requires]\n[env]\n";

const WINDOWS_PROFILE: &str = "[settings]\narch=x86_64\narch_build=x86_64\nbuild_type=Release\ncompiler=Visual Studio\ncompiler.runtime=MD\ncompiler.version=16\nos=Windows\nos_build=Windows\n[options]\n[build_requires]\n[env]\n";

const MACOS_PROFILE: &str = "[settings]\narch=x86_64\narch_build=x86_64\nbuild_type=Release\ncompiler=apple-clang\ncompiler.libcxx=libc++\ncompiler.version=13\nos=Macos\nos_build=Macos\n[options]\n[build_requires]\n[env]\n";

/// Host platforms with a known build profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    Windows,
    Macos,
}

impl Platform {
    /// Platform of the running process.
    pub fn host() -> Result<Self> {
        std::env::consts::OS.parse()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Windows => "windows",
            Platform::Macos => "macos",
        }
    }

    /// Settings bundle handed verbatim to the external tool as the host profile.
    pub fn profile(&self) -> &'static str {
        match self {
            Platform::Linux => LINUX_PROFILE,
            Platform::Windows => WINDOWS_PROFILE,
            Platform::Macos => MACOS_PROFILE,
        }
    }
}

impl FromStr for Platform {
    type Err = SourceCheckError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linux" => Ok(Platform::Linux),
            "windows" => Ok(Platform::Windows),
            "macos" => Ok(Platform::Macos),
            other => Err(SourceCheckError::UnsupportedPlatform(other.to_string())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve the profile string for a platform identifier.
pub fn profile_for(platform: &str) -> Result<&'static str> {
    Ok(platform.parse::<Platform>()?.profile())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_supported_platform_has_its_own_profile() {
        let linux = profile_for("linux").expect("linux");
        let windows = profile_for("windows").expect("windows");
        let macos = profile_for("macos").expect("macos");
        assert!(linux.contains("os=Linux"));
        assert!(linux.contains("compiler=gcc"));
        assert!(windows.contains("os=Windows"));
        assert!(macos.contains("os=Macos"));
        assert_ne!(linux, windows);
        assert_ne!(windows, macos);
    }

    #[test]
    fn unknown_platform_is_unsupported() {
        for name in ["freebsd", "Linux", "", "android"] {
            let err = profile_for(name).expect_err("must be unsupported");
            assert!(
                matches!(err, SourceCheckError::UnsupportedPlatform(ref p) if p == name),
                "unexpected error: {}",
                err
            );
        }
    }

    #[test]
    fn platform_round_trips_through_its_name() {
        for p in [Platform::Linux, Platform::Windows, Platform::Macos] {
            assert_eq!(p.as_str().parse::<Platform>().expect("parse"), p);
        }
    }
}
