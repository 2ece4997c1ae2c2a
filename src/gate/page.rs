//! HTML for the login and sign-out forms.

pub const INVALID_CREDENTIALS: &str = "Invalid username or password.";
pub const LOCKED_OUT: &str = "Too many failed login attempts. Please wait and try again.";
pub const FORM_EXPIRED: &str = "Your form expired. Please try again.";

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn document(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <meta name=\"robots\" content=\"noindex\">\n<title>{title}</title>\n</head>\n\
         <body>\n{body}</body>\n</html>\n"
    )
}

#[must_use]
pub fn login(csrf_token: &str, next: &str, error: Option<&str>) -> String {
    let error = error
        .map(|message| format!("<p role=\"alert\">{}</p>\n", escape(message)))
        .unwrap_or_default();
    let body = format!(
        "<main>\n<h1>Sign in</h1>\n{error}<form method=\"post\" action=\"/login\">\n\
         <input type=\"hidden\" name=\"csrf_token\" value=\"{csrf}\">\n\
         <input type=\"hidden\" name=\"next\" value=\"{next}\">\n\
         <label>Username <input name=\"username\" autocomplete=\"username\" required></label>\n\
         <label>Password <input type=\"password\" name=\"password\" autocomplete=\"current-password\" required></label>\n\
         <button type=\"submit\">Sign in</button>\n</form>\n</main>\n",
        csrf = escape(csrf_token),
        next = escape(next),
    );
    document("Sign in", &body)
}

#[must_use]
pub fn logout(csrf_token: &str) -> String {
    let body = format!(
        "<main>\n<h1>Sign out</h1>\n<form method=\"post\" action=\"/logout\">\n\
         <input type=\"hidden\" name=\"csrf_token\" value=\"{}\">\n\
         <button type=\"submit\">Sign out</button>\n</form>\n</main>\n",
        escape(csrf_token)
    );
    document("Sign out", &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape("<a href=\"x\">'&'</a>"),
            "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;&lt;/a&gt;"
        );
    }

    #[test]
    fn login_form_carries_hidden_fields() {
        let html = login("tok", "/menu?a=1&b=2", Some(INVALID_CREDENTIALS));
        assert!(html.contains("name=\"csrf_token\" value=\"tok\""));
        assert!(html.contains("name=\"next\" value=\"/menu?a=1&amp;b=2\""));
        assert!(html.contains(INVALID_CREDENTIALS));
    }

    #[test]
    fn logout_form_posts_to_logout() {
        let html = logout("tok");
        assert!(html.contains("action=\"/logout\""));
        assert!(html.contains("value=\"tok\""));
    }
}
