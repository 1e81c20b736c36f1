// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::net::TcpListener;
use thiserror::Error;
use tracing::{debug, warn};

/// 端口检测错误类型
#[derive(Error, Debug)]
pub enum PortProbeError {
    #[error("端口号 {0} 无效")]
    InvalidPort(u16),
    #[error("{address}:{port} 已被占用: {reason}")]
    PortInUse {
        address: String,
        port: u16,
        reason: String,
    },
}

/// 端口检测器
///
/// 服务启动前确认监听端口可用。端口被占用时直接报错，不会尝试其它端口
pub struct PortProbe;

impl PortProbe {
    /// 检查指定地址上的端口是否已被占用
    ///
    /// # 参数
    ///
    /// * `address` - 监听地址
    /// * `port` - 要检查的端口号
    ///
    /// # 返回值
    ///
    /// * `bool` - 如果端口已被占用返回 true，否则返回 false
    pub fn is_port_in_use(address: &str, port: u16) -> bool {
        TcpListener::bind((address, port)).is_err()
    }

    /// 确认端口可用
    ///
    /// 通过一次绑定尝试确认，绑定成功后立即释放监听器
    pub fn ensure_available(address: &str, port: u16) -> Result<(), PortProbeError> {
        if port == 0 {
            return Err(PortProbeError::InvalidPort(port));
        }

        match TcpListener::bind((address, port)) {
            Ok(listener) => {
                drop(listener);
                debug!(address, port, "port is available");
                Ok(())
            }
            Err(e) => {
                warn!(address, port, error = %e, "端口 {} 已被占用", port);
                Err(PortProbeError::PortInUse {
                    address: address.to_string(),
                    port,
                    reason: e.to_string(),
                })
            }
        }
    }
}
