use std::path::PathBuf;

// For argp::FromArgs
pub fn native_path(value: &str) -> Result<PathBuf, String> {
    if value.is_empty() {
        return Err("path must not be empty".to_string());
    }
    Ok(PathBuf::from(value))
}

pub fn pull_request_number(value: &str) -> Result<u64, String> {
    let value = value.trim_start_matches('#');
    match value.parse::<u64>() {
        Ok(0) | Err(_) => Err(format!("invalid pull request number: {value}")),
        Ok(number) => Ok(number),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_request_number() {
        assert_eq!(pull_request_number("42"), Ok(42));
        assert_eq!(pull_request_number("#42"), Ok(42));
        assert!(pull_request_number("0").is_err());
        assert!(pull_request_number("main").is_err());
    }

    #[test]
    fn test_native_path() {
        assert_eq!(native_path("check-pr.yml"), Ok(PathBuf::from("check-pr.yml")));
        assert!(native_path("").is_err());
    }
}
