pub mod merged_csv;
