use crate::libs::app_config::AppConfig;
use crate::prelude::Res;
use itertools::Itertools;
use systemctl::SystemCtl;

const UNIT_NAME: &str = "gpuview";
const UNIT_PATH: &str = "/etc/systemd/system";

/// Installs `gpuview run` with the given options as a systemd unit and
/// (re)starts it. systemd is also what brings the server back after it exits
/// on a sampler failure.
pub fn install(config: &AppConfig) -> Res {
    let exe = std::env::current_exe()?;
    let command = std::iter::once(exe.to_string_lossy().into_owned())
        .chain(config.to_run_args())
        .map(|arg| quote(&arg))
        .join(" ");

    let unit_path = format!("{UNIT_PATH}/{UNIT_NAME}.service");
    log::info!("writing {unit_path}");
    std::fs::write(&unit_path, render_unit(&command))?;

    let systemd = SystemCtl::default();
    systemd.daemon_reload()?;
    systemd.enable(UNIT_NAME)?;
    // restart so a reinstall picks up the new options
    systemd.restart(UNIT_NAME)?;
    log::info!("{UNIT_NAME} service installed, listening on {}:{}", config.host, config.port);
    Ok(())
}

fn render_unit(exec_start: &str) -> String {
    format!(
        r#"[Unit]
Description=gpuview GPU monitoring dashboard
Wants=network-online.target
After=network.target network-online.target

[Service]
Type=simple
ExecStart={exec_start}
Restart=always
RestartSec=5

[Install]
WantedBy=multi-user.target
"#
    )
}

fn quote(arg: &str) -> String {
    if arg.contains(char::is_whitespace) || arg.contains('"') {
        format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        arg.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_restarts_the_server() {
        let unit = render_unit("/usr/bin/gpuview run --port=9988");
        assert!(unit.contains("ExecStart=/usr/bin/gpuview run --port=9988\n"));
        assert!(unit.contains("Restart=always"));
    }

    #[test]
    fn arguments_with_spaces_are_quoted() {
        assert_eq!(quote("--port=9988"), "--port=9988");
        assert_eq!(
            quote("--db-path=/srv/gpu stats/db"),
            "\"--db-path=/srv/gpu stats/db\""
        );
    }
}
