// Copyright 2016-2019 Tony Kuo.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::process::exit;

use structopt::StructOpt;

use eagle::cli::{run, Eagle};

pub fn main() {
    let opt = Eagle::from_args();

    // setup logger
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{}] {}", record.level(), message))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stderr())
        .apply()
        .unwrap();

    exit(match run(opt) {
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
        _ => 0,
    })
}
