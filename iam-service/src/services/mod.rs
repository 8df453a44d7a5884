pub mod clock;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod iam;
pub mod matcher;
pub mod metrics;
pub mod repository;
pub mod saga;
pub mod session;

pub use clock::{Clock, IdGenerator, SystemClock, UuidGenerator};
pub use error::{ErrorKind, ServiceError};
pub use evaluator::{DecisionEngine, EvalError, EvalState};
pub use graph::{GraphError, IdentityGraph};
pub use iam::IamService;
pub use matcher::PolicyMatcher;
pub use metrics::{get_metrics, init_metrics};
pub use repository::Repository;
pub use saga::{Compensation, CompensationReport, Saga};
pub use session::{Session, SessionClaims, SessionService};
