// Copyright (c) 2018 Nuclear Furnace
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Layered configuration: a default source overridden, where present, by a second source.

use std::path::Path;
use std::time::Duration;

use config::{Config, File, FileFormat};

use crate::errors::CoreError;

/// Supervisor-wide configuration, loaded from a default source and optionally shadowed by an
/// override source layered on top of it.
pub struct ServiceConfig {
    inner: Config,
}

impl ServiceConfig {
    /// Loads `default_path` as the base layer and, if present, `override_path` as a second layer
    /// whose keys take precedence over the base.
    pub fn load(default_path: impl AsRef<Path>, override_path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let inner = Config::builder()
            .add_source(File::from(default_path.as_ref()))
            .add_source(File::from(override_path.as_ref()).required(false))
            .build()?;
        Ok(ServiceConfig { inner })
    }

    /// Builds a configuration directly from a JSON string, bypassing the filesystem. Used by
    /// tests and by callers who assemble configuration in memory.
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        let inner = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Json))
            .build()?;
        Ok(ServiceConfig { inner })
    }

    pub fn host(&self) -> String {
        self.inner.get_string("host").unwrap_or_else(|_| "127.0.0.1".to_owned())
    }

    pub fn port(&self) -> u16 {
        self.inner.get_int("port").map(|v| v as u16).unwrap_or(8080)
    }

    pub fn debug(&self) -> bool {
        self.inner.get_bool("debug").unwrap_or(false)
    }

    /// How often the supervisor sends a `PING` to each worker.
    pub fn watchdog_ping_timeout(&self) -> Duration {
        let secs = self.inner.get_float("watchdog_ping_timeout").unwrap_or(10.0);
        Duration::from_secs_f64(secs)
    }

    /// How long a worker may go without receiving any envelope before the supervisor considers
    /// it unresponsive and restarts it.
    pub fn watchdog_check_timeout(&self) -> Duration {
        let secs = self.inner.get_float("watchdog_check_timeout").unwrap_or(12.0);
        Duration::from_secs_f64(secs)
    }

    /// Raw typed accessor for worker-specific configuration sections, so `SubProcess`
    /// implementations can read their own settings out of the same layered source without the
    /// supervisor needing to know their shape.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.inner.get_string(key).ok()
    }
}
