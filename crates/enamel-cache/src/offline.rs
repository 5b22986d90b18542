//! Offline fallback page

use crate::request::Response;

/// Heading shown on the offline page
pub const OFFLINE_HEADING: &str = "You're Offline";

/// Emergency line shown on the offline page
pub const EMERGENCY_PHONE: &str = "(123) 456-7890";

const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Offline - Dr. Islam Elsagher Dental Clinic</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            align-items: center;
            justify-content: center;
            min-height: 100vh;
            margin: 0;
            background: linear-gradient(135deg, #2563eb 0%, #1e40af 100%);
            color: white;
            text-align: center;
        }
        .offline-container { max-width: 400px; padding: 2rem; }
        .offline-icon { font-size: 4rem; margin-bottom: 1rem; }
        .emergency-contact {
            background: rgba(255, 255, 255, 0.1);
            padding: 1rem;
            border-radius: 8px;
            margin-top: 2rem;
        }
        .emergency-contact a { color: white; font-weight: bold; }
        .retry-btn {
            background: white;
            color: #2563eb;
            border: none;
            padding: 0.75rem 1.5rem;
            border-radius: 6px;
            font-weight: bold;
            cursor: pointer;
            margin-top: 1rem;
        }
    </style>
</head>
<body>
    <div class="offline-container">
        <div class="offline-icon">&#129463;</div>
        <h1>You're Offline</h1>
        <p>Please check your internet connection and try again.</p>
        <div class="emergency-contact">
            <h3>Dental Emergency?</h3>
            <p>Call us directly:</p>
            <a href="tel:+1234567890">(123) 456-7890</a>
            <p><small>Available 24/7 for emergencies</small></p>
        </div>
        <button class="retry-btn" onclick="window.location.reload()">Try Again</button>
    </div>
</body>
</html>
"#;

/// The page served when neither the network nor the cache can answer
pub fn offline_page() -> Response {
    Response::html(OFFLINE_PAGE)
}
