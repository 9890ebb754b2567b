use relauth_core::tuple::{Tuple, TupleParseError, TupleWrite};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {source}")]
pub struct TupleFileError {
    pub line: usize,
    #[source]
    pub source: TupleParseError,
}

/// Parses a tuple file: one `type:id#relation@subject` per line. Blank lines
/// and `//` comments are skipped.
pub fn parse_tuple_file(contents: &str) -> Result<Vec<TupleWrite>, TupleFileError> {
    contents
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = line.split("//").next().unwrap_or_default().trim();
            (!line.is_empty()).then_some((index + 1, line))
        })
        .map(|(line, text)| {
            text.parse::<Tuple>()
                .map(TupleWrite::from)
                .map_err(|source| TupleFileError { line, source })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use relauth_core::tuple::{ObjectRef, SubjectRef};

    use super::*;

    #[test]
    fn parses_tuples_skipping_blanks_and_comments() {
        let contents = "\
// engineering
team:eng#member@user:alice

doc:readme#viewer@team:eng#member  // whole team
";

        let writes = parse_tuple_file(contents).unwrap();

        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].object, ObjectRef::new("team", "eng"));
        assert_eq!(writes[1].subject, SubjectRef::userset("team", "eng", "member"));
    }

    #[test]
    fn empty_file_has_no_tuples() {
        assert_eq!(parse_tuple_file("\n  \n// nothing\n"), Ok(Vec::new()));
    }

    #[test]
    fn errors_report_the_line_number() {
        let contents = "team:eng#member@user:alice\n\ndoc:readme#viewer\n";

        let err = parse_tuple_file(contents).unwrap_err();

        assert_eq!(err.line, 3);
        assert!(matches!(err.source, TupleParseError::MissingSubject(_)));
        assert!(err.to_string().starts_with("line 3: "), "got: {err}");
    }
}
