//! Claim worker binary: drains the claim queue and runs the authoritative
//! claim transaction. See `vouchers_lib::worker` for details.

extern crate env_logger;
extern crate vouchers_lib;

fn main() {
    // Prepare logger
    env_logger::init();

    let config = vouchers_lib::config::Config::new().expect("Can't load app config!");

    vouchers_lib::start_worker(config);
}
