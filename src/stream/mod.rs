pub mod framer;
pub mod session;

pub use framer::{ EventFramer, FrameSink, SessionOutcome };
pub use session::{ SessionHandler, SessionRequest, SessionSettings };
