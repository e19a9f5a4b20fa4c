pub mod course;
pub mod execution_result;
pub mod learning_material;
pub mod question;
pub mod student_score;
pub mod test_case;
pub mod test_case_change_tracker;
pub mod user;

pub use course::Entity as Course;
pub use execution_result::Entity as ExecutionResult;
pub use learning_material::Entity as LearningMaterial;
pub use question::Entity as Question;
pub use student_score::Entity as StudentScore;
pub use test_case::Entity as TestCase;
pub use test_case_change_tracker::Entity as TestCaseChangeTracker;
pub use user::Entity as User;
