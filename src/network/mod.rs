pub mod capture;
pub mod medium;
pub mod transport;
pub mod udp;

pub use capture::CapturingSender;
pub use medium::{BroadcastMedium, MediumReceiver, MediumSender};
pub use transport::{DatagramReceiver, DatagramSender};
pub use udp::{UdpReceiver, UdpSender};
