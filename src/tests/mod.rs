pub mod test_training;
