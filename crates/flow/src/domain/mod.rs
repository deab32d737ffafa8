//! Tipos de dominio del plano de control: checkpoint, sesiones, eventos,
//! protocolo con el Fiber Runner y registros salientes.
pub mod checkpoint;
pub mod event;
pub mod ids;
pub mod io;
pub mod records;
pub mod session;
pub mod status;

pub use checkpoint::*;
pub use event::*;
pub use ids::*;
pub use io::*;
pub use records::*;
pub use session::*;
pub use status::*;
