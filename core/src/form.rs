//! `application/x-www-form-urlencoded` encoding of request arguments.

use serde_json::Value;
use url::form_urlencoded::byte_serialize;

use crate::http::Args;

/// Append `key=value` pairs to `buffer`, joined by `&` and URL-escaped.
///
/// `first_already_written` says whether `buffer` already ends in a pair, in
/// which case the first new pair is preceded by `&`. Empty keys are skipped.
pub fn append_args(buffer: &mut String, args: &Args, first_already_written: bool) {
    let mut need_separator = first_already_written;
    for (key, value) in args {
        if key.is_empty() {
            continue;
        }
        if need_separator {
            buffer.push('&');
        }
        buffer.extend(byte_serialize(key.as_bytes()));
        buffer.push('=');
        buffer.extend(byte_serialize(arg_value(value).as_bytes()));
        need_separator = true;
    }
}

/// Encode a whole argument map as a form body.
pub fn encode_args(args: &Args) -> String {
    let mut body = String::new();
    append_args(&mut body, args, false);
    body
}

/// `url` with `args` appended to its query string.
pub fn url_with_args(url: &str, args: &Args) -> String {
    if args.keys().all(|k| k.is_empty()) {
        return url.to_string();
    }
    let mut out = String::from(url);
    let first_already_written = match url.find('?') {
        None => {
            out.push('?');
            false
        }
        Some(_) => !(url.ends_with('?') || url.ends_with('&')),
    };
    append_args(&mut out, args, first_already_written);
    out
}

fn arg_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn args(value: Value) -> Args {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn single_pair() {
        assert_eq!(encode_args(&args(json!({"username": "test0"}))), "username=test0");
    }

    #[test]
    fn empty_args_encode_to_nothing() {
        assert_eq!(encode_args(&Args::new()), "");
    }

    #[test]
    fn values_are_escaped_and_joined() {
        let encoded = encode_args(&args(json!({"a": "x y&z", "b": 2, "c": true, "d": null})));
        assert_eq!(encoded, "a=x+y%26z&b=2&c=true&d=null");
    }

    #[test]
    fn keys_are_escaped_and_empty_keys_skipped() {
        let encoded = encode_args(&args(json!({"": "ignored", "k=1": "v"})));
        assert_eq!(encoded, "k%3D1=v");
    }

    #[test]
    fn appends_after_existing_pairs() {
        let mut buffer = String::from("x=1");
        append_args(&mut buffer, &args(json!({"y": "2"})), true);
        assert_eq!(buffer, "x=1&y=2");
    }

    #[test]
    fn url_query_building() {
        let a = args(json!({"page": 1}));
        assert_eq!(url_with_args("http://h/list", &a), "http://h/list?page=1");
        assert_eq!(url_with_args("http://h/list?sort=asc", &a), "http://h/list?sort=asc&page=1");
        assert_eq!(url_with_args("http://h/list?", &a), "http://h/list?page=1");
        assert_eq!(url_with_args("http://h/list", &Args::new()), "http://h/list");
    }
}
