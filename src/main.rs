use std::collections::HashMap;
use std::{env, fs};

use serde::Deserialize;
use socks5d::{Server, StaticCredentials};
use tokio::runtime::Runtime;

#[derive(Deserialize)]
struct Config {
    listen: String,
    #[serde(default)]
    users: HashMap<String, String>,
}

fn main() {
    env_logger::init();

    let mut args = env::args();
    if args.len() != 2 {
        println!("Usage: {} config.toml", args.nth(0).unwrap());
        return;
    }

    let content = fs::read_to_string(args.nth(1).unwrap()).unwrap();
    let config: Config = toml::from_str(&content).unwrap();

    let mut server = Server::new();
    if !config.users.is_empty() {
        server.set_authentication(StaticCredentials::from_iter(config.users));
    }

    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        log::info!("listening on {}", config.listen);
        server.listen(&config.listen).await.unwrap();
    });
}
