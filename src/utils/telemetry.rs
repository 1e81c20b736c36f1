// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::settings::LoggingSettings;

const DEFAULT_FILTER: &str = "info,crawlship=debug";

/// 初始化日志
///
/// `RUST_LOG` 优先于配置中的过滤规则；重复初始化会被忽略
pub fn init_telemetry(logging: &LoggingSettings) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        logging
            .filter
            .clone()
            .unwrap_or_else(|| DEFAULT_FILTER.to_string())
            .into()
    });

    let registry = tracing_subscriber::registry().with(filter);

    let result = if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already initialized");
    }
}
