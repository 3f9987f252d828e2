//
// Copyright (c) 2023 ZettaScale Technology
//
// This program and the accompanying materials are made available under the
// terms of the Eclipse Public License 2.0 which is available at
// http://www.eclipse.org/legal/epl-2.0, or the Apache License, Version 2.0
// which is available at https://www.apache.org/licenses/LICENSE-2.0.
//
// SPDX-License-Identifier: EPL-2.0 OR Apache-2.0
//
// Contributors:
//   ZettaScale Zenoh Team, <zenoh@zettascale.tech>
//
//! Int-keyed configuration properties of a session.

use std::collections::HashMap;

use zenoh_leaf_core::{ZError, ZResult};
use zenoh_leaf_protocol::core::{whatami, Locator, ZInt};
use zenoh_leaf_protocol::defaults;

pub const ZN_CONFIG_MODE_KEY: ZInt = 0x40;
/// The locator of the remote endpoint to connect to.
pub const ZN_CONFIG_CONNECT_KEY: ZInt = 0x41;
/// Historical alias of [`ZN_CONFIG_CONNECT_KEY`].
pub const ZN_CONFIG_PEER_KEY: ZInt = ZN_CONFIG_CONNECT_KEY;
pub const ZN_CONFIG_USER_KEY: ZInt = 0x43;
pub const ZN_CONFIG_PASSWORD_KEY: ZInt = 0x44;
pub const ZN_CONFIG_MULTICAST_SCOUTING_KEY: ZInt = 0x45;
pub const ZN_CONFIG_MULTICAST_INTERFACE_KEY: ZInt = 0x46;
pub const ZN_CONFIG_MULTICAST_ADDRESS_KEY: ZInt = 0x47;
pub const ZN_CONFIG_SCOUTING_TIMEOUT_KEY: ZInt = 0x49;
pub const ZN_CONFIG_ADD_TIMESTAMP_KEY: ZInt = 0x4a;

pub const ZN_CONFIG_MODE_CLIENT: &str = "client";
pub const ZN_CONFIG_MODE_PEER: &str = "peer";

/// Session info property keys.
pub const ZN_INFO_PID_KEY: ZInt = 0x00;
pub const ZN_INFO_PEER_PID_KEY: ZInt = 0x01;
pub const ZN_INFO_ROUTER_PID_KEY: ZInt = 0x02;

/// A list of int-keyed string properties.
pub type Properties = Vec<(ZInt, String)>;

/// Configuration to pass to [`open`](crate::open).
#[derive(Debug, Clone, Default)]
pub struct Config {
    properties: HashMap<ZInt, String>,
}

impl Config {
    /// A client configuration, optionally pointed at a router locator.
    pub fn client(peer: Option<&str>) -> Config {
        let mut config = Config::default();
        config.insert(ZN_CONFIG_MODE_KEY, ZN_CONFIG_MODE_CLIENT);
        if let Some(locator) = peer {
            config.insert(ZN_CONFIG_CONNECT_KEY, locator);
        }
        config
    }

    /// A peer configuration on the default multicast group.
    pub fn peer() -> Config {
        let mut config = Config::default();
        config.insert(ZN_CONFIG_MODE_KEY, ZN_CONFIG_MODE_PEER);
        config
    }

    pub fn insert(&mut self, key: ZInt, value: &str) {
        self.properties.insert(key, value.to_string());
    }

    pub fn get(&self, key: ZInt) -> Option<&str> {
        self.properties.get(&key).map(|s| s.as_str())
    }

    /// The whatami of the session; defaults to client.
    pub fn mode(&self) -> ZResult<ZInt> {
        match self.get(ZN_CONFIG_MODE_KEY) {
            None | Some(ZN_CONFIG_MODE_CLIENT) => Ok(whatami::CLIENT),
            Some(ZN_CONFIG_MODE_PEER) => Ok(whatami::PEER),
            Some(other) => {
                log::error!("unsupported mode: {other}");
                Err(ZError::Invalid)
            }
        }
    }

    pub fn connect_locator(&self) -> ZResult<Option<Locator>> {
        match self.get(ZN_CONFIG_CONNECT_KEY) {
            Some(s) => Ok(Some(s.parse()?)),
            None => Ok(None),
        }
    }

    /// The multicast group locator, defaulting to the scouting address.
    pub fn multicast_locator(&self) -> ZResult<Locator> {
        self.get(ZN_CONFIG_MULTICAST_ADDRESS_KEY)
            .unwrap_or(defaults::SCOUT_ADDRESS)
            .parse()
    }

    pub fn scouting_timeout_ms(&self) -> u64 {
        self.get(ZN_CONFIG_SCOUTING_TIMEOUT_KEY)
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults::SCOUT_TIMEOUT_MS)
    }

    pub fn add_timestamp(&self) -> bool {
        matches!(self.get(ZN_CONFIG_ADD_TIMESTAMP_KEY), Some("true") | Some("1"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes() {
        assert_eq!(Config::default().mode().unwrap(), whatami::CLIENT);
        assert_eq!(Config::peer().mode().unwrap(), whatami::PEER);
        let mut config = Config::default();
        config.insert(ZN_CONFIG_MODE_KEY, "broker");
        assert!(config.mode().is_err());
    }

    #[test]
    fn locators() {
        let config = Config::client(Some("tcp/127.0.0.1:7447"));
        assert_eq!(
            config.connect_locator().unwrap().unwrap().protocol,
            "tcp"
        );
        assert_eq!(
            Config::peer().multicast_locator().unwrap().address,
            "224.0.0.224:7446"
        );
    }
}
