// Crate-wide constants shared by the sessions, the monitor and the filter glue

/// Host sample rate assumed when nothing else is known
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Sample rates offered for VBAN streams
pub const COMMON_SAMPLE_RATES_HZ: [u32; 6] = [22050, 32000, 44100, 48000, 88200, 96000];

/// Device id meaning "the system default output"
pub const DEFAULT_DEVICE_ID: &str = "default";

/// Device id selecting the VBAN network session in filter settings
pub const VBAN_DEVICE_ID: &str = "VBAN";

/// Default VBAN UDP port
pub const VBAN_DEFAULT_PORT: u16 = 6980;

/// VBAN header length in bytes
pub const VBAN_HEADER_SIZE: usize = 28;

/// Largest VBAN audio payload per datagram
pub const VBAN_MAX_PAYLOAD: usize = 1436;

/// Largest frame count a VBAN packet may declare (frames-1 fits in one byte)
pub const VBAN_MAX_FRAMES_PER_PACKET: usize = 256;

/// Stream name length inside the VBAN header
pub const VBAN_STREAM_NAME_LEN: usize = 16;

/// Native buffers rotated by queue-based sessions
pub const NATIVE_BUFFER_COUNT: usize = 3;

/// Threshold under which volume/balance are treated as no-ops
pub const DSP_EPSILON: f32 = 1e-6;

/// Upper bound of the filter delay in milliseconds
pub const MAX_DELAY_MS: u32 = 10_000;
