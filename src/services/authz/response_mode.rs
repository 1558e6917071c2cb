//! Final payload encoding: query redirect, fragment redirect, or an
//! auto-submitting HTML form (`form_post`).

use crate::services::authz::error::AuthzError;
use crate::services::authz::request::ResponseMode;
use crate::services::authz::response_type::AuthzResponseParams;

/// How the payload reaches the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// 302 redirect to `location`.
    Redirect { location: String },
    /// HTML document posting the parameters back to the redirect URI.
    FormPost { body: String },
}

const FORM_POST_TEMPLATE: &str = r#"<html>
  <head>
    <title>Submit This Form</title>
  </head>
  <body onload="javascript:document.forms[0].submit()">
    <form method="post" action="{action}">
{inputs}
    </form>
  </body>
</html>"#;

/// Encode the response parameters for delivery.
///
/// An explicit `response_mode` is checked against the fragment obligation:
/// `fragment` demands `fragment_enc`, `query` demands its absence,
/// `form_post` is always allowed. Without an explicit mode the obligation
/// decides.
pub fn encode_response(
    params: &AuthzResponseParams,
    redirect_uri: &str,
    fragment_enc: bool,
    mode: Option<ResponseMode>,
) -> Result<Delivery, AuthzError> {
    match mode {
        Some(ResponseMode::FormPost) => Ok(Delivery::FormPost {
            body: render_form_post(params, redirect_uri),
        }),
        Some(ResponseMode::Fragment) => {
            if !fragment_enc {
                return Err(AuthzError::InvalidRequest(
                    "wrong response_mode".to_string(),
                ));
            }
            Ok(redirect(params, redirect_uri, true))
        }
        Some(ResponseMode::Query) => {
            if fragment_enc {
                return Err(AuthzError::InvalidRequest(
                    "wrong response_mode".to_string(),
                ));
            }
            Ok(redirect(params, redirect_uri, false))
        }
        None => Ok(redirect(params, redirect_uri, fragment_enc)),
    }
}

fn redirect(params: &AuthzResponseParams, redirect_uri: &str, fragment: bool) -> Delivery {
    let mut ser = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in params.to_pairs() {
        ser.append_pair(name, &value);
    }
    let encoded = ser.finish();
    let sep = if fragment {
        '#'
    } else if redirect_uri.contains('?') {
        '&'
    } else {
        '?'
    };
    Delivery::Redirect {
        location: format!("{redirect_uri}{sep}{encoded}"),
    }
}

fn render_form_post(params: &AuthzResponseParams, redirect_uri: &str) -> String {
    let inputs = params
        .to_pairs()
        .iter()
        .map(|(name, value)| {
            format!(
                "        <input type=\"hidden\" name=\"{}\" value=\"{}\"/>",
                name,
                escape_attr(value)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    FORM_POST_TEMPLATE
        .replace("{action}", &escape_attr(redirect_uri))
        .replace("{inputs}", &inputs)
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_code_state() -> AuthzResponseParams {
        AuthzResponseParams {
            code: Some("abc".to_string()),
            state: Some("s1".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn query_redirect_without_explicit_mode() {
        let d = encode_response(&params_code_state(), "https://rp.example/cb", false, None).unwrap();
        assert_eq!(
            d,
            Delivery::Redirect {
                location: "https://rp.example/cb?code=abc&state=s1".to_string()
            }
        );
    }

    #[test]
    fn fragment_redirect_when_obliged() {
        let mut params = params_code_state();
        params.access_token = Some("at".to_string());
        let d = encode_response(&params, "https://rp.example/cb", true, None).unwrap();
        match d {
            Delivery::Redirect { location } => {
                assert!(location.starts_with("https://rp.example/cb#"));
                assert!(location.contains("access_token=at"));
            }
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    #[test]
    fn registered_query_redirect_appends_with_ampersand() {
        let d = encode_response(
            &params_code_state(),
            "https://rp.example/cb?k=v",
            false,
            None,
        )
        .unwrap();
        assert_eq!(
            d,
            Delivery::Redirect {
                location: "https://rp.example/cb?k=v&code=abc&state=s1".to_string()
            }
        );
    }

    #[test]
    fn explicit_fragment_mode_requires_fragment_enc() {
        let err = encode_response(
            &params_code_state(),
            "https://rp.example/cb",
            false,
            Some(ResponseMode::Fragment),
        )
        .unwrap_err();
        assert_eq!(err.oauth_code(), "invalid_request");
    }

    #[test]
    fn explicit_query_mode_requires_no_fragment_enc() {
        let err = encode_response(
            &params_code_state(),
            "https://rp.example/cb",
            true,
            Some(ResponseMode::Query),
        )
        .unwrap_err();
        assert_eq!(err.oauth_code(), "invalid_request");
    }

    #[test]
    fn form_post_renders_one_hidden_input_per_key() {
        let d = encode_response(
            &params_code_state(),
            "https://rp.example/cb",
            false,
            Some(ResponseMode::FormPost),
        )
        .unwrap();
        let Delivery::FormPost { body } = d else {
            panic!("expected form_post");
        };

        assert_eq!(body.matches("<input type=\"hidden\"").count(), 2);
        assert!(body.contains("name=\"code\" value=\"abc\""));
        assert!(body.contains("name=\"state\" value=\"s1\""));
        assert!(body.contains("action=\"https://rp.example/cb\""));
        assert!(body.contains("document.forms[0].submit()"));
    }

    #[test]
    fn form_post_escapes_attribute_values() {
        let mut params = params_code_state();
        params.state = Some("\"><script>".to_string());
        let d = encode_response(
            &params,
            "https://rp.example/cb",
            false,
            Some(ResponseMode::FormPost),
        )
        .unwrap();
        let Delivery::FormPost { body } = d else {
            panic!("expected form_post");
        };
        assert!(!body.contains("<script>"));
        assert!(body.contains("&quot;&gt;&lt;script&gt;"));
    }
}
