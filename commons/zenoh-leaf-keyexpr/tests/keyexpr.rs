//
// Copyright (c) 2023 ZettaScale Technology
//
// This program and the accompanying materials are made available under the
// terms of the Eclipse Public License 2.0 which is available at
// http://www.eclipse.org/legal/epl-2.0, or the Apache License, Version 2.0
// which is available at https://www.apache.org/licenses/LICENSE-2.0.
//
// SPDX-License-Identifier: EPL-2.0 OR Apache-2.0
//
// Contributors:
//   ZettaScale Zenoh Team, <zenoh@zettascale.tech>
//
use zenoh_leaf_keyexpr::{canonize, includes, intersects, CanonStatus};

#[test]
fn test_intersects() {
    assert!(intersects("a", "a"));
    assert!(intersects("a/b", "a/b"));
    assert!(intersects("*", "abc"));
    assert!(intersects("*", "xxx"));
    assert!(intersects("ab$*", "abcd"));
    assert!(intersects("ab$*d", "abcd"));
    assert!(!intersects("ab$*d", "abcde"));
    assert!(intersects("ab$*", "ab"));
    assert!(!intersects("ab/*", "ab"));
    assert!(intersects("a/*/c/*/e", "a/b/c/d/e"));
    assert!(intersects("a/**/d/**/l", "a/b/c/d/e/f/g/h/i/l"));
    assert!(intersects("a/**/d/**/l", "a/d/foo/l"));
    assert!(intersects("a/$*b/c/$*d/e", "a/xb/c/xd/e"));
    assert!(!intersects("a/*/c/*/e", "a/c/e"));
    assert!(!intersects("a/*/c/*/e", "a/b/c/d/x/e"));
    assert!(!intersects("ab$*cd", "abxxcxxd"));
    assert!(intersects("ab$*cd", "abxxcxxcd"));
    assert!(!intersects("ab$*cd", "abxxcxxcdx"));
    assert!(intersects("**", "abc"));
    assert!(intersects("**", "a/b/c"));
    assert!(intersects("ab/**", "ab"));
    assert!(intersects("**/xyz", "a/b/xyz/d/e/f/xyz"));
    assert!(intersects("a/**/c/**/e", "a/c/e"));
    assert!(intersects("a/**/c/*/e/*", "a/b/b/b/c/d/d/c/d/e/f"));
    assert!(!intersects("a/**/c/*/e/*", "a/b/b/b/c/d/d/c/d/d/e/f"));
    assert!(intersects("x/abc", "x/abc"));
    assert!(!intersects("x/abc", "abc"));
    assert!(intersects("x/*", "x/abc"));
    assert!(!intersects("x/*", "abc"));
    assert!(!intersects("*", "x/abc"));
    assert!(intersects("x/*", "x/abc$*"));
    assert!(intersects("x/$*abc", "x/abc$*"));
    assert!(intersects("x/a$*", "x/abc$*"));
    assert!(intersects("x/a$*de", "x/abc$*de"));
    assert!(intersects("x/a$*d$*e", "x/a$*e"));
    assert!(intersects("x/a$*d$*e", "x/a$*c$*e"));
    assert!(intersects("x/a$*d$*e", "x/ade"));
    assert!(!intersects("x/c$*", "x/abc$*"));
    assert!(!intersects("x/$*d", "x/$*e"));
    assert!(intersects("*", "a"));
    assert!(intersects("a", "*"));
    assert!(intersects("*", "aaaaa"));
    assert!(intersects("**", "a"));
    assert!(intersects("a", "**"));
    assert!(intersects("a/a/a/a", "**"));
    assert!(intersects("a/*", "a/b"));
    assert!(!intersects("a/*/b", "a/b"));
    assert!(intersects("a/**/b", "a/b"));
    assert!(intersects("a/b$*", "a/b"));
    assert!(intersects("a/$*b$*", "a/b"));
    assert!(intersects("a/$*b", "a/b"));
    assert!(intersects("a/b$*", "a/bc"));
    assert!(intersects("a/$*b$*", "a/ebc"));
    assert!(intersects("a/$*b", "a/cb"));
    assert!(!intersects("a/b$*", "a/ebc"));
    assert!(!intersects("a/$*b", "a/cbc"));
    assert!(intersects("a/**/b$*", "a/b"));
    assert!(intersects("a/**/$*b$*", "a/b"));
    assert!(intersects("a/**/$*b", "a/b"));
    assert!(intersects("a/**/b$*", "a/bc"));
    assert!(intersects("a/**/$*b$*", "a/ebc"));
    assert!(intersects("a/**/$*b", "a/cb"));
    assert!(intersects("a/**/b/c/**/d", "a/b/b/b/c/d"));
    assert!(!intersects("a/**/b/c/**/d", "a/b/@b/b/c/d"));
    assert!(intersects("a/**/b/@b/**/b/c/**/d", "a/b/@b/b/c/d"));
    assert!(!intersects("a/**/b$*", "a/ebc"));
    assert!(!intersects("a/**/$*b", "a/cbc"));
    // Symmetry.
    assert!(intersects("a/b/c/d/e", "a/**/c/*/e"));
    assert!(!intersects("@a/@b", "@a/**"));
}

#[test]
fn test_includes() {
    assert!(includes("a", "a"));
    assert!(includes("a/b", "a/b"));
    assert!(includes("*", "a"));
    assert!(!includes("a", "*"));
    assert!(includes("*", "aaaaa"));
    assert!(includes("**", "a"));
    assert!(!includes("a", "**"));
    assert!(includes("**", "a/a/a/a"));
    assert!(includes("**", "*/**"));
    assert!(includes("*/**", "*/**"));
    assert!(!includes("*/**", "**"));
    assert!(!includes("a/a/a/a", "**"));
    assert!(includes("a/*", "a/b"));
    assert!(!includes("a/*/b", "a/b"));
    assert!(includes("a/**/b", "a/b"));
    assert!(includes("a/b$*", "a/b"));
    assert!(!includes("a/b", "a/b$*"));
    assert!(includes("a/$*b$*", "a/b"));
    assert!(includes("a/$*b", "a/b"));
    assert!(includes("a/b$*", "a/bc"));
    assert!(includes("a/$*b$*", "a/ebc"));
    assert!(includes("a/$*b", "a/cb"));
    assert!(!includes("a/b$*", "a/ebc"));
    assert!(!includes("a/$*b", "a/cbc"));
    assert!(includes("a/**/b$*", "a/b"));
    assert!(includes("a/**/$*b$*", "a/b"));
    assert!(includes("a/**/$*b", "a/b"));
    assert!(includes("a/**/b$*", "a/bc"));
    assert!(includes("a/**/$*b$*", "a/ebc"));
    assert!(includes("a/**/$*b", "a/cb"));
    assert!(!includes("a/**/b$*", "a/ebc"));
    assert!(!includes("a/**/$*b", "a/cbc"));
    assert!(includes("@a", "@a"));
    assert!(!includes("@a", "@ab"));
    assert!(!includes("@a", "@a/b"));
    assert!(!includes("@a", "@a/*"));
    assert!(!includes("@a", "@a/*/**"));
    assert!(!includes("@a$*/**", "@a"));
    assert!(!includes("@a", "@a/**"));
    assert!(includes("@a/**", "@a"));
    assert!(!includes("**/xyz$*xyz", "@a/b/xyzdefxyz"));
    assert!(includes("@a/**/c/**/e", "@a/b/b/b/c/d/d/d/e"));
    assert!(!includes("@a/*", "@a/@b"));
    assert!(!includes("@a/**", "@a/@b"));
    assert!(includes("@a/**/@b", "@a/@b"));
}

#[test]
fn relation_properties() {
    let kes = [
        "a",
        "a/b",
        "a/*",
        "a/**",
        "a/**/b",
        "a/$*b",
        "a/b$*",
        "*",
        "**",
        "*/**",
        "@a/b",
        "@a/**",
        "demo/example/foo",
        "demo/**",
    ];
    for a in kes {
        assert!(includes(a, a), "includes({a}, {a})");
        assert!(intersects(a, a), "intersects({a}, {a})");
        for b in kes {
            // Intersection is symmetric.
            assert_eq!(
                intersects(a, b),
                intersects(b, a),
                "intersects({a}, {b}) is not symmetric"
            );
            // Mutual inclusion only holds for equal expressions.
            if includes(a, b) && includes(b, a) {
                assert_eq!(a, b, "includes({a}, {b}) in both directions");
            }
            // Inclusion implies intersection.
            if includes(a, b) {
                assert!(intersects(a, b), "includes({a}, {b}) without intersection");
            }
        }
    }
}

#[test]
fn test_canonize() {
    let vectors: &[(&str, CanonStatus, &str)] = &[
        ("greetings/hello/there", CanonStatus::Success, "greetings/hello/there"),
        ("greetings/good/*/morning", CanonStatus::Success, "greetings/good/*/morning"),
        ("greetings/*", CanonStatus::Success, "greetings/*"),
        ("greetings/*/**", CanonStatus::Success, "greetings/*/**"),
        ("greetings/$*", CanonStatus::Success, "greetings/*"),
        ("greetings/**/*/morning", CanonStatus::Success, "greetings/*/**/morning"),
        ("greetings/**/*/g/morning", CanonStatus::Success, "greetings/*/**/g/morning"),
        ("greetings/**/*/m", CanonStatus::Success, "greetings/*/**/m"),
        ("greetings/**/*", CanonStatus::Success, "greetings/*/**"),
        ("greetings/**/**", CanonStatus::Success, "greetings/**"),
        ("greetings/**/**/morning", CanonStatus::Success, "greetings/**/morning"),
        ("greetings/**/**/g/morning", CanonStatus::Success, "greetings/**/g/morning"),
        ("greetings/**/**/m", CanonStatus::Success, "greetings/**/m"),
        ("greetings/**/*/**", CanonStatus::Success, "greetings/*/**"),
        ("$*", CanonStatus::Success, "*"),
        ("$*$*", CanonStatus::Success, "*"),
        ("$*$*$*", CanonStatus::Success, "*"),
        ("$*hi$*$*", CanonStatus::Success, "$*hi$*"),
        ("$*$*hi$*", CanonStatus::Success, "$*hi$*"),
        ("hi$*$*$*", CanonStatus::Success, "hi$*"),
        ("$*$*$*hi", CanonStatus::Success, "$*hi"),
        ("$*$*$*hi$*$*$*", CanonStatus::Success, "$*hi$*"),
        ("hi*", CanonStatus::StarsInChunk, "hi*"),
        ("/hi", CanonStatus::EmptyChunk, "/hi"),
        ("hi/", CanonStatus::EmptyChunk, "hi/"),
        ("", CanonStatus::EmptyChunk, ""),
        ("greetings/**/*/", CanonStatus::EmptyChunk, "greetings/**/*/"),
        ("greetings/**/*/e?", CanonStatus::ContainsSharpOrQmark, "greetings/**/*/e?"),
        ("greetings/**/*/e#", CanonStatus::ContainsSharpOrQmark, "greetings/**/*/e#"),
        ("greetings/**/*/e$", CanonStatus::ContainsUnboundDollar, "greetings/**/*/e$"),
        ("greetings/**/*/$e", CanonStatus::ContainsUnboundDollar, "greetings/**/*/$e"),
    ];

    for (input, expected_status, expected) in vectors {
        let mut ke = input.to_string();
        let status = canonize(&mut ke);
        assert_eq!(status, *expected_status, "canonize({input:?})");
        if status == CanonStatus::Success {
            assert_eq!(&ke, expected, "canonize({input:?})");
        }
    }
}
