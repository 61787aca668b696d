pub mod decision_record;
