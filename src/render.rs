//! Rendering of the artifacts derived from a `SachetConfig`
//!
//! Everything here is a pure function of the config: the download URL,
//! the daemon command line, the YAML config document and the init unit.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::schema::{InitStyle, InstallMethod, SachetConfig};

const MANAGED_HEADER: &str = "Managed by sachet-converge. Local changes will be overwritten.";

/// Release archive URL: the explicit override, or the composed GitHub-style URL
pub fn download_url(config: &SachetConfig) -> String {
    if let Some(url) = &config.download_url {
        return url.clone();
    }
    format!(
        "{}/download/{}/{}.{}",
        config.download_url_base.trim_end_matches('/'),
        config.version,
        release_name(config),
        config.download_extension.extension()
    )
}

/// `<package>-<version>.<os>-<arch>`, the archive stem and extraction directory
pub fn release_name(config: &SachetConfig) -> String {
    format!(
        "{}-{}.{}-{}",
        config.package_name,
        config.version,
        config.os(),
        config.arch()
    )
}

/// Directory the release archive is extracted into
pub fn release_dir(config: &SachetConfig) -> PathBuf {
    config.install_root.join(release_name(config))
}

/// The path the init unit executes
pub fn binary_path(config: &SachetConfig) -> PathBuf {
    match config.install_method {
        InstallMethod::Url => config.bin_dir.join(&config.package_name),
        InstallMethod::Package => PathBuf::from("/usr/bin").join(&config.package_name),
    }
}

/// Daemon arguments: `<extra_options> -config <file> -listen-address :<port>`
pub fn service_args(config: &SachetConfig) -> String {
    let managed = format!(
        "-config {} -listen-address :{}",
        config.config_file().display(),
        config.listen_port
    );
    let extra = config.extra_options.trim();
    if extra.is_empty() {
        managed
    } else {
        format!("{extra} {managed}")
    }
}

#[derive(Serialize)]
struct ConfigDocument<'a> {
    providers: &'a BTreeMap<String, Value>,
    receivers: &'a [Value],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    templates: Vec<String>,
}

/// The daemon's YAML config file
pub fn render_config(config: &SachetConfig) -> Result<String> {
    let templates = if config.templates.is_empty() {
        Vec::new()
    } else {
        vec![config.templates_dir().join("*.tmpl").display().to_string()]
    };
    let document = ConfigDocument {
        providers: &config.providers,
        receivers: &config.receivers,
        templates,
    };
    let body = serde_yaml::to_string(&document).context("Failed to render config as YAML")?;
    Ok(format!("# {MANAGED_HEADER}\n{body}"))
}

/// Where the init unit lives, if this init style has one
pub fn unit_path(config: &SachetConfig) -> Option<PathBuf> {
    match config.init_style() {
        InitStyle::Systemd => Some(
            config
                .unit_dir
                .join(format!("{}.service", config.service_name)),
        ),
        InitStyle::Sysv => Some(config.initd_dir.join(&config.service_name)),
        InitStyle::None => None,
    }
}

/// The init unit for the configured init style
pub fn render_unit(config: &SachetConfig) -> Option<String> {
    match config.init_style() {
        InitStyle::Systemd => Some(systemd_unit(config)),
        InitStyle::Sysv => Some(sysv_script(config)),
        InitStyle::None => None,
    }
}

pub fn systemd_unit(config: &SachetConfig) -> String {
    format!(
        "# {header}
[Unit]
Description=Sachet notification relay
Documentation=https://github.com/messagebird/sachet
Wants=network-online.target
After=network-online.target

[Service]
Type=simple
User={user}
Group={group}
ExecStart={binary} {args}
ExecReload=/bin/kill -HUP $MAINPID
Restart=on-failure
RestartSec=5

[Install]
WantedBy=multi-user.target
",
        header = MANAGED_HEADER,
        user = config.user,
        group = config.group,
        binary = binary_path(config).display(),
        args = service_args(config),
    )
}

pub fn sysv_script(config: &SachetConfig) -> String {
    format!(
        r#"#!/bin/sh
# {header}
### BEGIN INIT INFO
# Provides:          {name}
# Required-Start:    $network $remote_fs $syslog
# Required-Stop:     $network $remote_fs $syslog
# Default-Start:     2 3 4 5
# Default-Stop:      0 1 6
# Short-Description: Sachet notification relay
### END INIT INFO

NAME={name}
DAEMON={binary}
DAEMON_ARGS={args}
RUN_AS={user}
PIDFILE=/var/run/$NAME.pid
LOGFILE=/var/log/$NAME.log

is_running() {{
    [ -f "$PIDFILE" ] && kill -0 "$(cat "$PIDFILE")" 2>/dev/null
}}

do_start() {{
    if is_running; then
        return 0
    fi
    su -s /bin/sh "$RUN_AS" -c "exec $DAEMON $DAEMON_ARGS" >>"$LOGFILE" 2>&1 &
    echo $! >"$PIDFILE"
}}

do_stop() {{
    if is_running; then
        kill "$(cat "$PIDFILE")"
    fi
    rm -f "$PIDFILE"
}}

case "$1" in
    start)
        do_start
        ;;
    stop)
        do_stop
        ;;
    restart)
        do_stop
        sleep 1
        do_start
        ;;
    status)
        if is_running; then
            echo "$NAME is running"
            exit 0
        fi
        echo "$NAME is stopped"
        exit 3
        ;;
    *)
        echo "Usage: $0 {{start|stop|restart|status}}" >&2
        exit 2
        ;;
esac
"#,
        header = MANAGED_HEADER,
        name = config.service_name,
        binary = binary_path(config).display(),
        args = shell_quote(&service_args(config)),
        user = config.user,
    )
}

/// Single-quote a string for /bin/sh
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
