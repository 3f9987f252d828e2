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
use clap::{App, Arg};
use zenoh_leaf::config::Config;
use zenoh_leaf::{ConsolidationMode, QueryTarget};

fn main() {
    // initiate logging
    env_logger::init();

    let (config, selector) = parse_args();

    println!("Opening session...");
    let session = zenoh_leaf::open(config).unwrap();

    println!("Sending query '{selector}'...");
    let replies = session
        .query_collect(
            &selector.as_str().into(),
            "",
            QueryTarget::default(),
            ConsolidationMode::default(),
        )
        .unwrap();

    for reply in replies {
        println!(
            ">> Received ('{}': '{}')",
            reply.data.res_name,
            String::from_utf8_lossy(reply.data.payload.as_slice())
        );
    }

    session.close().unwrap();
}

fn parse_args() -> (Config, String) {
    let args = App::new("zenoh-leaf query example")
        .arg(
            Arg::from_usage("-e, --connect=[LOCATOR] 'The locator of the router to connect to.'"),
        )
        .arg(
            Arg::from_usage("-s, --selector=[SELECTOR] 'The selection of resources to query.'")
                .default_value("demo/example/**"),
        )
        .get_matches();

    let config = Config::client(args.value_of("connect"));
    let selector = args.value_of("selector").unwrap().to_string();
    (config, selector)
}
