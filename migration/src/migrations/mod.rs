pub mod m202605010001_create_courses;
pub mod m202605010002_create_learning_materials;
pub mod m202605010003_create_questions;
pub mod m202605010004_create_test_cases;
pub mod m202605010005_create_users;
pub mod m202605010006_create_student_scores;
pub mod m202605010007_create_execution_results;
pub mod m202605010008_create_test_case_change_trackers;
