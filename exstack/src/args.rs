//! Command-line configuration for the `demos/` binaries (spec §6 supplement).
//!
//! `original_source/exstack/exstack.h` takes `buf_cnt`/`pkg_size` as plain
//! constructor arguments, with any CLI parsing left to the client program.
//! Following the teacher's `Configuration::from_args`, this crate's own demos
//! parse their parameters the same way, through `getopts`.

/// Parsed command-line parameters for a demo session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionArgs {
    /// Number of peers to simulate on `ThreadTransport`.
    pub peers: usize,
    /// Packages per send/receive slot.
    pub capacity: usize,
    /// Bytes per package.
    pub item_size: usize,
    /// Whether to run the barrier-free engine instead of the default.
    pub barrier_free: bool,
}

impl Default for SessionArgs {
    fn default() -> Self {
        SessionArgs { peers: 4, capacity: 16, item_size: 8, barrier_free: false }
    }
}

#[cfg(feature = "getopts")]
impl SessionArgs {
    /// Parses `--peers`, `--capacity`, `--item-size`, and `--barrier-free`
    /// from the supplied argument iterator (commonly `std::env::args()`).
    pub fn from_args<I: Iterator<Item = String>>(args: I) -> Result<SessionArgs, String> {
        let mut opts = getopts::Options::new();
        opts.optopt("n", "peers", "number of simulated peers", "NUM");
        opts.optopt("c", "capacity", "packages per send/receive slot", "NUM");
        opts.optopt("s", "item-size", "bytes per package", "NUM");
        opts.optflag("b", "barrier-free", "use the barrier-free (ExStack2) engine");

        let matches = opts.parse(args).map_err(|e| format!("{e:?}"))?;

        let defaults = SessionArgs::default();
        let peers = matches
            .opt_str("n")
            .map(|s| s.parse().map_err(|e| format!("--peers: {e}")))
            .transpose()?
            .unwrap_or(defaults.peers);
        let capacity = matches
            .opt_str("c")
            .map(|s| s.parse().map_err(|e| format!("--capacity: {e}")))
            .transpose()?
            .unwrap_or(defaults.capacity);
        let item_size = matches
            .opt_str("s")
            .map(|s| s.parse().map_err(|e| format!("--item-size: {e}")))
            .transpose()?
            .unwrap_or(defaults.item_size);
        let barrier_free = matches.opt_present("barrier-free");

        if peers == 0 {
            return Err("--peers must be at least 1".to_owned());
        }
        if capacity == 0 {
            return Err("--capacity must be at least 1".to_owned());
        }
        if item_size == 0 || item_size > 65536 {
            return Err("--item-size must be in [1, 65536]".to_owned());
        }

        Ok(SessionArgs { peers, capacity, item_size, barrier_free })
    }
}
