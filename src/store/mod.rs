pub mod defense;
pub mod plans;

pub use defense::DefenseArchive;
pub use plans::PlanStore;
