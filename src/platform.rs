//! Host detection for release downloads and init systems.
//!
//! Release archives are named with Go-style platform names
//! (`linux-amd64`, `darwin-arm64`), so the Rust target names are mapped here.

use crate::schema::InitStyle;
use std::path::Path;

/// Directory that exists only when systemd is PID 1.
const SYSTEMD_RUNTIME_DIR: &str = "/run/systemd/system";

/// Release OS name for the running host.
///
/// | Rust target OS | Release name |
/// |----------------|--------------|
/// | linux          | linux        |
/// | macos          | darwin       |
/// | freebsd        | freebsd      |
/// | netbsd         | netbsd       |
/// | openbsd        | openbsd      |
#[must_use]
pub fn host_os() -> &'static str {
    os_name(std::env::consts::OS)
}

/// Release architecture name for the running host.
#[must_use]
pub fn host_arch() -> &'static str {
    arch_name(std::env::consts::ARCH)
}

fn os_name(os: &'static str) -> &'static str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

fn arch_name(arch: &'static str) -> &'static str {
    match arch {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "arm" => "armv7",
        "powerpc64" if cfg!(target_endian = "little") => "ppc64le",
        "powerpc64" => "ppc64",
        other => other,
    }
}

/// Pick the init style of the running host.
///
/// systemd when its runtime directory is present, SysV otherwise.
#[must_use]
pub fn detect_init_style() -> InitStyle {
    detect_init_style_at(Path::new(SYSTEMD_RUNTIME_DIR))
}

fn detect_init_style_at(systemd_dir: &Path) -> InitStyle {
    if systemd_dir.is_dir() {
        InitStyle::Systemd
    } else {
        InitStyle::Sysv
    }
}
