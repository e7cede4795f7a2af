//! Turn processing: history reconstruction on the way in, accumulation and
//! chunked publishing on the way out.

pub mod accumulator;
pub mod attachment_cache;
pub mod checkpoint;
pub mod command_parser;
pub mod fragments;
pub mod publish_cursor;
pub mod publisher;
pub mod responder;
pub mod throttle;
pub mod timeline;

pub use accumulator::{CHECK_CORRECTNESS_TOOL, ResponseAccumulator, ResponseState, clean_content};
pub use attachment_cache::AttachmentCache;
pub use checkpoint::CheckpointedStream;
pub use command_parser::{Segment, SegmentKind, TextCommandParser};
pub use fragments::FragmentIndex;
pub use publish_cursor::PublishCursor;
pub use publisher::ChunkedEventPublisher;
pub use responder::{Responder, TurnOutcome};
pub use throttle::CoalescingScheduler;
pub use timeline::{Timeline, TimelineReconstructor};
