// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// TCP bind address, e.g. "0.0.0.0"
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Group this node replicates within; the first segment of every fid it
    /// hands out.
    pub group: String,

    /// Identity of this node instance, recorded in binlog entries.
    pub instance_id: String,

    /// Shared secret clients must present during CONNECT.
    pub secret: String,

    /// Root of the content-addressed object tree.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Staging area for in-flight uploads; same filesystem as data_dir so
    /// commits are a rename.
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: String,

    /// Tracker endpoints ("host:port"). Empty means standalone mode.
    #[serde(default)]
    pub trackers: Vec<String>,

    #[serde(default)]
    pub binlog: BinlogConfig,

    #[serde(default)]
    pub io: IoConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinlogConfig {
    /// Directory holding the change log.
    #[serde(default = "default_binlog_dir")]
    pub dir: String,
}

impl Default for BinlogConfig {
    fn default() -> Self {
        Self {
            dir: default_binlog_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IoConfig {
    /// Chunk size for streaming upload bodies, in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
        }
    }
}

impl Config {
    pub fn from_path(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let s = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&s)?;
        Ok(cfg)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6577
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_tmp_dir() -> String {
    "./tmp".to_string()
}

fn default_binlog_dir() -> String {
    "./binlog".to_string()
}

fn default_buffer_size() -> usize {
    64 * 1024
}
