//! Page-level extraction stages: element resolution, popups, filters,
//! pagination, detail capture and login.

pub mod detail;
pub mod filter;
pub mod login;
pub mod pagination;
pub mod popup;
pub mod selector;

pub use detail::{DetailValidator, RecordDetailExtractor, TabGuard, Validation};
pub use filter::{FilterConfigurator, FilterRequest, InputStyle};
pub use login::LoginHandOff;
pub use pagination::{parse_counter, CycleGuard, CycleVerdict, PaginationWalker};
pub use popup::{PopupDismisser, PopupScanReport};
pub use selector::SelectorResolver;
