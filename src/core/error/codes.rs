use super::ErrorCode;

pub(crate) fn all_codes() -> &'static [ErrorCode] {
    &[
        ErrorCode::ConfigNotFound,
        ErrorCode::ConfigInvalidJson,
        ErrorCode::ConfigInvalidToml,
        ErrorCode::ConfigInvalidValue,
        ErrorCode::PipelineResourceExhausted,
        ErrorCode::StageLaunchFailed,
        ErrorCode::StageRedirectFailed,
        ErrorCode::SupervisorWaitFailed,
        ErrorCode::SupervisorUnknownProcess,
        ErrorCode::SupervisorAlreadyRun,
        ErrorCode::InternalIoError,
        ErrorCode::InternalJsonError,
        ErrorCode::InternalUnexpected,
    ]
}

pub(crate) fn parse_code(code: &str) -> Option<ErrorCode> {
    all_codes()
        .iter()
        .copied()
        .find(|candidate| candidate.as_str() == code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn code_names_are_unique_and_parse_back() {
        let mut seen = HashSet::new();
        for code in all_codes() {
            assert!(seen.insert(code.as_str()), "duplicate {}", code.as_str());
            assert_eq!(parse_code(code.as_str()), Some(*code));
        }
    }

    #[test]
    fn unknown_code_does_not_parse() {
        assert_eq!(parse_code("deploy.build_failed"), None);
    }
}
