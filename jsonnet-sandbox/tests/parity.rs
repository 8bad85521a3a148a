//! Every evaluator variant produces the same output for the same input.

mod common;

use common::{pool_options, process_options};
use jsonnet_sandbox::{make_secure_vm, EvalContext, ProcessPool, Vm, VmOptions};

const SNIPPETS: &[&str] = &[
    "1+1",
    "{ b: [1, 2, 3], a: 'text with\\nnewline' }",
    r#"std.extVar("code") + { var: std.extVar("var") }"#,
    r#"function(name, flag) { name: name, flag: flag }"#,
    "std.manifestJsonEx({ x: [1, { y: null }] }, '  ')",
];

fn bind(vm: &mut dyn Vm) {
    vm.ext_code("code", "{ from_code: 1 + 1 }");
    vm.ext_var("var", "plain");
    vm.tla_var("name", "parity");
    vm.tla_code("flag", "!false");
}

#[tokio::test]
async fn test_all_variants_agree() {
    let pool = ProcessPool::with_max_size(2);
    let mut vms = vec![
        make_secure_vm(VmOptions::new()),
        make_secure_vm(process_options(EvalContext::background())),
        make_secure_vm(pool_options(EvalContext::background(), &pool)),
    ];
    for vm in vms.iter_mut() {
        bind(vm.as_mut());
    }

    for snippet in SNIPPETS {
        let mut outputs = vec![];
        for vm in &vms {
            outputs.push(vm.evaluate_anonymous_snippet("parity", snippet).await.unwrap());
        }
        assert_eq!(outputs[0], outputs[1], "one-shot differs for {}", snippet);
        assert_eq!(outputs[0], outputs[2], "pooled differs for {}", snippet);
    }
    pool.close();
}

#[tokio::test]
async fn test_all_variants_refuse_imports() {
    let pool = ProcessPool::with_max_size(1);
    let vms = vec![
        make_secure_vm(VmOptions::new()),
        make_secure_vm(process_options(EvalContext::background())),
        make_secure_vm(pool_options(EvalContext::background(), &pool)),
    ];

    for vm in &vms {
        let err = vm
            .evaluate_anonymous_snippet("parity", "importstr '/etc/hostname'")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("import not available"), "{}", err);
    }
    pool.close();
}
