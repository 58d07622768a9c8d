pub mod ballot;
pub mod net;
pub mod player;
pub mod room_code;
pub mod session;
pub mod time;
pub mod words;
