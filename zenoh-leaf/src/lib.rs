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
//! Zenoh-leaf: a lightweight zenoh client for constrained leaf nodes.
//!
//! The client participates in a zenoh system as a leaf: it connects to a
//! router (client mode) or joins a multicast group (peer mode), then
//! publishes, subscribes, queries and answers queries.
//!
//! # Examples
//! ```no_run
//! use zenoh_leaf::{open, Config};
//!
//! let session = open(Config::client(Some("tcp/127.0.0.1:7447"))).unwrap();
//! session.write(&"demo/example/hello".into(), "hello".as_bytes().into()).unwrap();
//! session.close().unwrap();
//! ```

pub mod config;
mod liveliness;
mod scout;
mod session;
pub mod types;

pub use config::{Config, Properties};
pub use scout::scout;
pub use session::Session;
pub use types::*;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use session::SessionDispatcher;
use zenoh_leaf_core::{bail, ZError, ZResult};
use zenoh_leaf_protocol::core::{whatami, Locator, ZenohId};
use zenoh_leaf_transport::{Transport, TransportConfig};

/// Open a session with the given configuration: connect to a router in
/// client mode, join the multicast group in peer mode.
pub fn open(config: Config) -> ZResult<Session> {
    log::debug!("opening session");
    let mode = config.mode()?;
    match mode {
        whatami::CLIENT => {
            let locator = match config.connect_locator()? {
                Some(locator) => locator,
                None => {
                    // No endpoint configured: scout for a router.
                    let timeout = Duration::from_millis(config.scouting_timeout_ms());
                    let hellos = scout(Some(whatami::ROUTER), &config, timeout)?;
                    match hellos.into_iter().find_map(|h| h.locators.into_iter().next()) {
                        Some(locator) => locator,
                        None => {
                            log::error!("no router found by scouting");
                            bail!(ZError::TransportOpenFailed);
                        }
                    }
                }
            };
            if is_multicast(&locator) {
                bail!(ZError::ConfigUnsupportedClientMulticast);
            }
            let link = zenoh_leaf_link::new_link(&locator)?;
            Session::init(&config, link)
        }
        whatami::PEER => {
            let locator = config.multicast_locator()?;
            let link = zenoh_leaf_link::udp::connect(&locator)?;
            let zid = ZenohId::rand();
            let tconfig = TransportConfig::new(zid, mode);
            let dispatcher = Arc::new(SessionDispatcher::new());
            let transport = Transport::Multicast(zenoh_leaf_transport::multicast::open_peer(
                link,
                &tconfig,
                dispatcher.clone(),
            )?);
            Session::wire(&config, zid, mode, transport, dispatcher)
        }
        _ => Err(ZError::Invalid),
    }
}

fn is_multicast(locator: &Locator) -> bool {
    locator
        .address
        .split(':')
        .next()
        .and_then(|host| host.parse::<Ipv4Addr>().ok())
        .map(|ip| ip.is_multicast())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_mode_refuses_multicast_endpoints() {
        let config = Config::client(Some("udp/224.0.0.224:7446"));
        assert_eq!(
            open(config).err(),
            Some(ZError::ConfigUnsupportedClientMulticast)
        );
    }
}
