// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use clap::Parser;
use crawlship::config::settings::Settings;
use crawlship::presentation::{commands, Cli};
use crawlship::utils::errors::PipelineError;
use crawlship::utils::telemetry;
use tracing::{error, info};

/// 主函数
///
/// 加载配置、初始化日志并执行子命令，按出错阶段设置退出码
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            let err = PipelineError::from(e);
            eprintln!("crawlship: {}", err);
            std::process::exit(err.exit_code());
        }
    };

    // 2. Initialize logging
    telemetry::init_telemetry(&settings.logging);
    info!(project = %settings.project.name, "crawlship {}", env!("CARGO_PKG_VERSION"));

    // 3. Run command
    match commands::execute(cli.command, &settings).await {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!(stage = %e.stage(), error = %e, "pipeline halted");
            std::process::exit(e.exit_code());
        }
    }
}
