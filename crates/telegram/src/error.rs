use {
    botpanel_channels::Error,
    teloxide::{ApiError, RequestError},
};

/// Map a Bot API failure onto the transport taxonomy.
pub(crate) fn classify(err: RequestError) -> Error {
    match err {
        RequestError::Api(ApiError::InvalidToken) => Error::credential("bot token rejected by Telegram"),
        // Telegram answers 404 for tokens that do not belong to any bot.
        RequestError::Api(ApiError::Unknown(ref description)) if description == "Not Found" => {
            Error::credential("bot token not recognised by Telegram")
        },
        RequestError::Api(ApiError::TerminatedByOtherGetUpdates) => {
            Error::fatal("another instance is already polling with this token")
        },
        other => Error::transient(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_token_is_credential_error() {
        let err = classify(RequestError::Api(ApiError::InvalidToken));
        assert!(matches!(err, Error::Credential { .. }));
    }

    #[test]
    fn unknown_bot_is_credential_error() {
        let err = classify(RequestError::Api(ApiError::Unknown("Not Found".into())));
        assert!(matches!(err, Error::Credential { .. }));
    }

    #[test]
    fn conflicting_poller_is_fatal() {
        let err = classify(RequestError::Api(ApiError::TerminatedByOtherGetUpdates));
        assert!(matches!(err, Error::Fatal { .. }));
    }

    #[test]
    fn other_api_errors_are_transient() {
        let err = classify(RequestError::Api(ApiError::Unknown("Bad Gateway".into())));
        assert!(matches!(err, Error::Transient { .. }));
        assert!(!err.is_fatal());
    }
}
