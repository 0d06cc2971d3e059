#![warn(missing_docs)]
/*! A host-side control library for UHF Gen2 (and related) RFID readers.

This crate drives a reader over a serial line or TCP socket: it frames
commands, parses responses, maintains a named parameter registry, executes
tag operations (inventory, read/write/lock/kill of tag memory), and runs
background streaming reads that fan tag events out to listeners.

# Architecture overview

A [`ReaderCore`](reader::ReaderCore) is built from a URI and dispatches to a
protocol variant behind the [`ReaderVariant`](reader::ReaderVariant) trait.
This crate fully implements the serial command-set variant; the RQL and
LLRP variants are out of scope and represented by a stub that reports
[`Error::Unsupported`] for everything beyond the capability probe `connect`
needs for dispatch.

```text
   [ Transport ]            byte-oriented duplex channel, timeout-bound
        |
   [ Framer ]                SOH | LEN | OPCODE | PAYLOAD | CRC16
        |
   [ CommandCodec ]          opcode catalog, status-code table, typed ops
        |
   [ ReaderCore ]            URI dispatch, parameter registry, lifecycle
      /      \
[ sync ops ]  [ BackgroundEngine ]   polled/continuous -> ListenerRegistry
```

# Example

```no_run
use std::time::Duration;
use gen2reader::ReaderCore;

let mut reader = ReaderCore::from_uri("eapi:///dev/ttyUSB0")?;
reader.connect()?;
let reads = reader.read_sync(Duration::from_millis(250))?;
for read in reads {
    println!("{:02x?}", read.tag.epc);
}
reader.destroy();
# Ok::<(), gen2reader::Error>(())
```

## Links

* Crate name: `gen2reader`
*/

pub mod background;
pub mod codec;
pub mod crc;
pub mod error;
pub mod framer;
pub mod gpio;
pub mod listener;
pub mod param;
pub mod reader;
pub mod region;
pub mod tag;
pub mod tagop;
pub mod transport;

pub use error::{Error, Result};
pub use reader::ReaderCore;
