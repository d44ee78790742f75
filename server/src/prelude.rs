use dotenv::var;
use log::LevelFilter;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

pub static DATA_DIR_PATH: LazyLock<PathBuf> = LazyLock::new(|| {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gpuview")
});

pub static CONFIG_DIR_PATH: LazyLock<PathBuf> = LazyLock::new(|| {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gpuview")
});

pub type Res = eyre::Result<()>;

pub fn init_logger() -> Res {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(LevelFilter::from_str(&var("LOG").unwrap_or("info".into()))?)
        // reqwest/hyper are chatty at debug
        .level_for("hyper_util", LevelFilter::Warn)
        .level_for("reqwest", LevelFilter::Warn)
        .chain(std::io::stdout())
        .apply()?;

    Ok(())
}
