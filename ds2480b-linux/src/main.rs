use clap::Parser;
use ds2480b::Ds2480bBuilder;

/// Enumerate the 1-Wire bus behind a DS2480B serial adapter
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Serial port of the adapter (e.g., /dev/ttyUSB0); falls back to
    /// the ONEWIRE_PORT environment variable
    #[arg(short, long)]
    path: Option<String>,
    /// Only list slaves in alarm state
    #[arg(long)]
    alarm: bool,
    /// Restrict the search to one family code (hex)
    #[arg(long, value_parser = parse_family)]
    family: Option<u8>,
    /// Poll reads one byte at a time (for buggy UART drivers)
    #[arg(long)]
    bytebang: bool,
    /// Also list the couplers reachable from the root segment
    #[arg(long)]
    couplers: bool,
    /// Highest UART rate for large transfers
    #[arg(long, default_value_t = 115_200)]
    streaming_baud: u32,
}

fn parse_family(s: &str) -> Result<u8, String> {
    u8::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

fn main() {
    // Initialize the logger
    env_logger::init();
    // Parse command line arguments
    let args = Args::parse();
    // Open the adapter
    let builder = Ds2480bBuilder::default()
        .with_bytebang_read(args.bytebang)
        .with_max_streaming_baud(args.streaming_baud);
    let bus = match &args.path {
        Some(path) => builder.open(path),
        None => builder.open_default(),
    }
    .expect("Failed to open the adapter");
    // Configure the search
    if let Some(family) = args.family {
        bus.target_family(family);
    }
    bus.set_search_only_alarming(args.alarm);
    // Enumerate devices on the 1-Wire bus
    let mut found = 0usize;
    let mut next = bus.search_first().expect("Failed to search the bus");
    while let Some(rom) = next {
        let device = bus.device_for(rom);
        println!("{rom}  {}", device.family_name());
        found += 1;
        next = bus.search_next().expect("Failed to search the bus");
    }
    log::info!("Found {found} devices");
    // The revision byte arrives with the first reset of the enumeration.
    if let Some(revision) = bus.revision() {
        log::info!(
            "adapter on {} revision {revision:#04x}, 12V program pulse {}",
            bus.port_name(),
            if bus.can_program() { "available" } else { "unavailable" }
        );
    }
    if args.couplers {
        // Branch points of the tree, for building OwPath routes.
        let couplers = bus
            .transaction(ds2409::Ds2409::enumerate)
            .expect("Failed to enumerate couplers");
        let root = ds2409::OwPath::root("DS9097U", bus.port_name());
        for coupler in couplers {
            for channel in [ds2409::CouplerChannel::Main, ds2409::CouplerChannel::Aux] {
                let path = root
                    .extend(coupler.rom(), channel)
                    .expect("coupler rom accepted");
                println!("branch {path}");
            }
        }
    }
}
