//! Vouchers is a microservice responsible for claiming and refunding
//! voucher codes. This crate is for running the service from
//! `vouchers_lib`. See `vouchers_lib` for details.

extern crate env_logger;
extern crate vouchers_lib;

fn main() {
    // Prepare logger
    env_logger::init();

    let config = vouchers_lib::config::Config::new().expect("Can't load app config!");

    vouchers_lib::start_server(config, &None);
}
