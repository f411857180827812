/// Builds `validator::ValidationErrors` from field/code/message triples.
///
/// ```ignore
/// validation_errors!({"date_issue_end": ["issue_window" => "Start must precede end"]})
/// ```
macro_rules! validation_errors {
    ({$($field:tt: [$($code:tt => $message:tt),*]),*}) => {{
        let mut errors = ::validator::ValidationErrors::new();
        $($(
            let error = ::validator::ValidationError {
                code: ::std::borrow::Cow::from($code),
                message: Some(::std::borrow::Cow::from($message)),
                params: ::std::collections::HashMap::new(),
            };
            errors.add($field, error);
        )*)*
        errors
    }};
}
