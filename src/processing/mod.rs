//! Origin tracking, transform encoding and frame throttling

pub mod origin;
pub mod throttle;
pub mod transform;

pub use origin::{OriginConfig, OriginResolver, OriginTransition, ResolverState};
pub use throttle::{FrameThrottle, OperationClass, RateLimiter, ThrottleConfig};
pub use transform::AnchorTransform;
