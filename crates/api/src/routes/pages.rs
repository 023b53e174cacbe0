//! Static confirmation pages

use axum::response::Html;

const PAGE_STYLE: &str = "font-family: -apple-system, sans-serif; text-align: center; \
                          margin-top: 18vh; color: #333;";

pub async fn email_verified() -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>GaiYa - Email Verified</title></head>
<body style="{PAGE_STYLE}">
  <h1>Email verified</h1>
  <p>Your GaiYa account is ready. You can close this page and return to the app.</p>
</body>
</html>"#
    ))
}

pub async fn payment_return() -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>GaiYa - Payment</title></head>
<body style="{PAGE_STYLE}">
  <h1>Payment received</h1>
  <p>You can close this page and return to GaiYa. Your upgrade will appear within a moment.</p>
</body>
</html>"#
    ))
}
