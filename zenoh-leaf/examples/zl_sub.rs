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
use zenoh_leaf::SubInfo;

fn main() {
    // initiate logging
    env_logger::init();

    let (config, selector) = parse_args();

    println!("Opening session...");
    let session = zenoh_leaf::open(config).unwrap();

    println!("Declaring subscriber on '{selector}'...");
    let _subscriber = session
        .declare_subscriber(&selector.as_str().into(), &SubInfo::default(), |sample| {
            println!(
                ">> [Subscriber] Received ('{}': '{}')",
                sample.res_name,
                String::from_utf8_lossy(sample.payload.as_slice())
            );
        })
        .unwrap();

    println!("Press CTRL-C to quit...");
    loop {
        std::thread::sleep(std::time::Duration::from_secs(1));
    }
}

fn parse_args() -> (Config, String) {
    let args = App::new("zenoh-leaf sub example")
        .arg(
            Arg::from_usage("-e, --connect=[LOCATOR] 'The locator of the router to connect to.'"),
        )
        .arg(
            Arg::from_usage("-s, --selector=[SELECTOR] 'The selection of resources to subscribe.'")
                .default_value("demo/example/**"),
        )
        .get_matches();

    let config = Config::client(args.value_of("connect"));
    let selector = args.value_of("selector").unwrap().to_string();
    (config, selector)
}
