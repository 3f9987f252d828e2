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
use std::time::Duration;
use zenoh_leaf::config::Config;

fn main() {
    // initiate logging
    env_logger::init();

    let (config, path, value) = parse_args();

    println!("Opening session...");
    let session = zenoh_leaf::open(config).unwrap();

    println!("Declaring resource '{path}'...");
    let rid = session.declare_resource(&path.as_str().into()).unwrap();
    let _publisher = session.declare_publisher(&rid.into()).unwrap();

    for idx in 0..u32::MAX {
        std::thread::sleep(Duration::from_secs(1));
        let buf = format!("[{idx:4}] {value}");
        println!("Putting Data ('{path}': '{buf}')...");
        session.write(&rid.into(), buf.into_bytes().into()).unwrap();
    }

    session.close().unwrap();
}

fn parse_args() -> (Config, String, String) {
    let args = App::new("zenoh-leaf pub example")
        .arg(
            Arg::from_usage("-e, --connect=[LOCATOR] 'The locator of the router to connect to.'"),
        )
        .arg(
            Arg::from_usage("-p, --path=[PATH] 'The key expression to publish onto.'")
                .default_value("demo/example/zenoh-leaf-pub"),
        )
        .arg(
            Arg::from_usage("-v, --value=[VALUE] 'The value to publish.'")
                .default_value("Pub from zenoh-leaf!"),
        )
        .get_matches();

    let config = Config::client(args.value_of("connect"));
    let path = args.value_of("path").unwrap().to_string();
    let value = args.value_of("value").unwrap().to_string();
    (config, path, value)
}
