use std::collections::HashMap;
use std::env;
use std::fmt::Write;
use std::path::PathBuf;

static CONFIGS: &[(&str, usize)] = &[
    ("IFACE_MAX_COUNT", 4),
    ("IFACE_MAX_IPV4_ADDR_COUNT", 2),
    ("IFACE_MAX_IPV4_MADDR_COUNT", 2),
    ("IFACE_MAX_IPV6_ADDR_COUNT", 4),
    ("IFACE_MAX_IPV6_MADDR_COUNT", 6),
    ("IFACE_MAX_IPV6_PREFIX_COUNT", 4),
    ("IFACE_MAX_ROUTER_COUNT", 4),
    ("IFACE_MAX_EVENT_COUNT", 16),
    ("IFACE_MAX_CALLBACK_COUNT", 4),
    ("IFACE_MAX_FRAME_LEN", 1514),
    ("IPV4_CONFIG_BLOCK_COUNT", 2),
    ("IPV6_CONFIG_BLOCK_COUNT", 2),
    ("ARP_TABLE_SIZE", 4),
    ("ARP_MAX_PENDING_PACKETS", 2),
    ("DHCPV4_SERVER_INSTANCES", 1),
    ("DHCPV4_SERVER_ADDR_COUNT", 4),
    ("DHCPV4_CLIENT_ID_MAX_LEN", 16),
    ("DHCPV4_PARAMETER_LIST_MAX_LEN", 16),
];

fn main() {
    let prefix = "NETIF_";

    let mut configs: HashMap<&str, usize> = CONFIGS.iter().copied().collect();

    for (name, _) in CONFIGS {
        let var = format!("{prefix}{name}");
        println!("cargo:rerun-if-env-changed={var}");
        if let Ok(value) = env::var(&var) {
            let value = value
                .parse::<usize>()
                .unwrap_or_else(|_| panic!("{var} must be an unsigned integer, got {value:?}"));
            if value == 0 {
                panic!("{var} must be at least 1");
            }
            configs.insert(*name, value);
        }
    }

    let mut data = String::new();
    for (name, _) in CONFIGS {
        let value = configs[name];
        writeln!(data, "pub const {name}: usize = {value};").unwrap();
    }

    let out_dir = PathBuf::from(env::var_os("OUT_DIR").unwrap());
    let out_file = out_dir.join("config.rs");
    std::fs::write(out_file, data).unwrap();
}
