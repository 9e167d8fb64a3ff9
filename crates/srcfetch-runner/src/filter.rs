use crate::profile::Platform;

/// Recipes that cannot be sourced on Linux.
const LINUX_BLOCKLIST: &[&str] = &[
    "7zip",
    "directx-headers",
    "mingw-builds",
    "msys2",
    "strawberryperl",
    "winflexbison",
    "winmd",
    "wtl",
];

const WINDOWS_ALLOWLIST: &[&str] = &[
    "7zip",
    "boost",
    "bzip2",
    "directx-headers",
    "fmt",
    "gtest",
    "libcurl",
    "openssl",
    "spdlog",
    "strawberryperl",
    "winflexbison",
    "wtl",
    "xz_utils",
    "zlib",
];

const MACOS_ALLOWLIST: &[&str] = &[
    "boost",
    "bzip2",
    "fmt",
    "gtest",
    "libcurl",
    "libiconv",
    "openssl",
    "spdlog",
    "xz_utils",
    "zlib",
];

/// Platform-based inclusion policy over recipe names.
///
/// Linux uses a blocklist, every other platform an allowlist. A disabled
/// filter includes everything.
#[derive(Debug, Clone, Copy)]
pub struct RecipeFilter {
    platform: Platform,
    enabled: bool,
}

impl RecipeFilter {
    pub fn new(platform: Platform, enabled: bool) -> Self {
        Self { platform, enabled }
    }

    pub fn includes(&self, recipe: &str) -> bool {
        if !self.enabled {
            return true;
        }
        match self.platform {
            Platform::Linux => !LINUX_BLOCKLIST.contains(&recipe),
            Platform::Windows => WINDOWS_ALLOWLIST.contains(&recipe),
            Platform::Macos => MACOS_ALLOWLIST.contains(&recipe),
        }
    }
}
