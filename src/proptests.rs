use proptest::prelude::*;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::dict::Dict;
use crate::intset::Intset;
use crate::listpack::{End, Listpack, Where};
use crate::quicklist::Quicklist;
use crate::sds::Sds;
use crate::skiplist::Skiplist;

/// Short values, a mix of decimal integers (stored encoded) and strings.
fn value_strategy() -> impl Strategy<Value = Vec<u8>> + Clone {
    prop_oneof![
        any::<i64>().prop_map(|v| v.to_string().into_bytes()),
        (0i64..200).prop_map(|v| v.to_string().into_bytes()),
        prop::collection::vec(any::<u8>(), 0..=24),
        prop::collection::vec(b'a'..=b'z', 60..=300),
    ]
}

// ============================================================================
// Quicklist vs VecDeque
// ============================================================================

#[derive(Clone, Debug)]
enum ListOp {
    Push(Vec<u8>, bool),
    Pop(bool),
    Insert(isize, Vec<u8>, bool),
    Replace(isize, Vec<u8>),
    Delete(isize),
    DeleteRange(isize, usize),
    Get(isize),
    Rotate,
}

fn list_ops_strategy() -> impl Strategy<Value = Vec<ListOp>> {
    let value = value_strategy();
    let index = -40isize..40;
    let op = prop_oneof![
        40 => (value.clone(), any::<bool>()).prop_map(|(v, h)| ListOp::Push(v, h)),
        10 => any::<bool>().prop_map(ListOp::Pop),
        15 => (index.clone(), value.clone(), any::<bool>()).prop_map(|(i, v, a)| ListOp::Insert(i, v, a)),
        10 => (index.clone(), value.clone()).prop_map(|(i, v)| ListOp::Replace(i, v)),
        8 => index.clone().prop_map(ListOp::Delete),
        3 => (index.clone(), 0usize..20).prop_map(|(i, n)| ListOp::DeleteRange(i, n)),
        10 => index.prop_map(ListOp::Get),
        4 => Just(ListOp::Rotate),
    ];
    prop::collection::vec(op, 0..=400)
}

fn resolve(len: usize, index: isize) -> Option<usize> {
    let i = if index < 0 { len as isize + index } else { index };
    (0..len as isize).contains(&i).then_some(i as usize)
}

fn check_list(ql: &Quicklist, model: &VecDeque<Vec<u8>>) -> Result<(), TestCaseError> {
    prop_assert_eq!(ql.len(), model.len());
    if let Err(e) = ql.validate() {
        return Err(TestCaseError::fail(e));
    }
    let got: Vec<Vec<u8>> = ql.iter().map(|e| e.into_vec()).collect();
    let expected: Vec<Vec<u8>> = model.iter().cloned().collect();
    prop_assert_eq!(got, expected);
    let rev: Vec<Vec<u8>> = ql.iter_rev().map(|e| e.into_vec()).collect();
    let expected_rev: Vec<Vec<u8>> = model.iter().rev().cloned().collect();
    prop_assert_eq!(rev, expected_rev);
    Ok(())
}

// ============================================================================
// Dict vs HashMap
// ============================================================================

#[derive(Clone, Debug)]
enum DictOp {
    Add(u16, u64),
    Replace(u16, u64),
    Delete(u16),
    Get(u16),
    Rehash(usize),
    Resize,
}

fn dict_ops_strategy() -> impl Strategy<Value = Vec<DictOp>> {
    let key = 0u16..512;
    let op = prop_oneof![
        30 => (key.clone(), any::<u64>()).prop_map(|(k, v)| DictOp::Add(k, v)),
        20 => (key.clone(), any::<u64>()).prop_map(|(k, v)| DictOp::Replace(k, v)),
        20 => key.clone().prop_map(DictOp::Delete),
        20 => key.prop_map(DictOp::Get),
        8 => (1usize..8).prop_map(DictOp::Rehash),
        2 => Just(DictOp::Resize),
    ];
    prop::collection::vec(op, 0..=1500)
}

fn dict_key(k: u16) -> Vec<u8> {
    format!("key:{k}").into_bytes()
}

// ============================================================================
// Skiplist vs sorted Vec
// ============================================================================

#[derive(Clone, Debug)]
enum ZslOp {
    Insert(i8, u8),
    Delete(u8),
    Update(u8, i8),
    Rank(u8),
}

fn zsl_ops_strategy() -> impl Strategy<Value = Vec<ZslOp>> {
    let member = 0u8..64;
    let score = any::<i8>();
    let op = prop_oneof![
        40 => (score.clone(), member.clone()).prop_map(|(s, m)| ZslOp::Insert(s, m)),
        20 => member.clone().prop_map(ZslOp::Delete),
        20 => (member.clone(), score).prop_map(|(m, s)| ZslOp::Update(m, s)),
        20 => member.prop_map(ZslOp::Rank),
    ];
    prop::collection::vec(op, 0..=500)
}

fn zsl_member(m: u8) -> Vec<u8> {
    format!("m{m:02}").into_bytes()
}

fn zsl_cmp(a: &(f64, Vec<u8>), b: &(f64, Vec<u8>)) -> Ordering {
    a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1))
}

// ============================================================================
// Listpack vs Vec
// ============================================================================

#[derive(Clone, Debug)]
enum LpOp {
    Append(Vec<u8>),
    Prepend(Vec<u8>),
    Insert(isize, Vec<u8>, bool),
    Replace(isize, Vec<u8>),
    Delete(isize),
    DeleteRange(isize, usize),
}

fn lp_ops_strategy() -> impl Strategy<Value = Vec<LpOp>> {
    let value = value_strategy();
    let index = -20isize..20;
    let op = prop_oneof![
        30 => value.clone().prop_map(LpOp::Append),
        15 => value.clone().prop_map(LpOp::Prepend),
        15 => (index.clone(), value.clone(), any::<bool>()).prop_map(|(i, v, a)| LpOp::Insert(i, v, a)),
        15 => (index.clone(), value).prop_map(|(i, v)| LpOp::Replace(i, v)),
        15 => index.clone().prop_map(LpOp::Delete),
        5 => (index, 0usize..6).prop_map(|(i, n)| LpOp::DeleteRange(i, n)),
    ];
    prop::collection::vec(op, 0..=300)
}

// ============================================================================
// Sds vs Vec<u8>
// ============================================================================

#[derive(Clone, Debug)]
enum SdsOp {
    Cat(Vec<u8>),
    Range(isize, isize),
    Trim(Vec<u8>),
    Upper,
    Clear,
    CatSelf,
    Shrink,
}

fn sds_ops_strategy() -> impl Strategy<Value = Vec<SdsOp>> {
    let bytes = prop::collection::vec(b'a'..=b'f', 0..=40);
    let op = prop_oneof![
        40 => bytes.clone().prop_map(SdsOp::Cat),
        15 => (-50isize..50, -50isize..50).prop_map(|(s, e)| SdsOp::Range(s, e)),
        10 => prop::collection::vec(b'a'..=b'f', 0..=3).prop_map(SdsOp::Trim),
        5 => Just(SdsOp::Upper),
        3 => Just(SdsOp::Clear),
        5 => Just(SdsOp::CatSelf),
        5 => Just(SdsOp::Shrink),
    ];
    prop::collection::vec(op, 0..=200)
}

fn model_range(v: &mut Vec<u8>, start: isize, end: isize) {
    let len = v.len() as isize;
    if len == 0 {
        return;
    }
    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { (len + end).max(0) } else { end }.min(len - 1);
    if start > end || start >= len {
        v.clear();
    } else {
        *v = v[start as usize..=end as usize].to_vec();
    }
}

fn model_trim(v: &mut Vec<u8>, cset: &[u8]) {
    let start = v.iter().position(|c| !cset.contains(c)).unwrap_or(v.len());
    let end = v.iter().rposition(|c| !cset.contains(c)).map_or(start, |e| e + 1);
    *v = v[start..end.max(start)].to_vec();
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        max_shrink_iters: 20_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_quicklist_equivalence(
        ops in list_ops_strategy(),
        fill in prop_oneof![Just(-2i32), Just(-1), 1i32..8],
        depth in 0u32..3,
    ) {
        let mut ql = Quicklist::new(fill, depth);
        let mut m: VecDeque<Vec<u8>> = VecDeque::new();

        for op in ops {
            match op {
                ListOp::Push(v, head) => {
                    if head {
                        ql.push_head(&v).unwrap();
                        m.push_front(v);
                    } else {
                        ql.push_tail(&v).unwrap();
                        m.push_back(v);
                    }
                }
                ListOp::Pop(head) => {
                    let (got, expected) = if head {
                        (ql.pop(End::Head), m.pop_front())
                    } else {
                        (ql.pop(End::Tail), m.pop_back())
                    };
                    prop_assert_eq!(got.map(|e| e.into_vec()), expected);
                }
                ListOp::Insert(i, v, after) => {
                    let side = if after { Where::After } else { Where::Before };
                    let inserted = ql.insert(i, side, &v).unwrap();
                    let at = resolve(m.len(), i);
                    prop_assert_eq!(inserted, at.is_some());
                    if let Some(at) = at {
                        m.insert(if after { at + 1 } else { at }, v);
                    }
                }
                ListOp::Replace(i, v) => {
                    let replaced = ql.replace(i, &v).unwrap();
                    let at = resolve(m.len(), i);
                    prop_assert_eq!(replaced, at.is_some());
                    if let Some(at) = at {
                        m[at] = v;
                    }
                }
                ListOp::Delete(i) => {
                    let got = ql.delete(i).map(|e| e.into_vec());
                    let expected = resolve(m.len(), i).and_then(|at| m.remove(at));
                    prop_assert_eq!(got, expected);
                }
                ListOp::DeleteRange(i, n) => {
                    let removed = ql.delete_range(i, n);
                    let expected = match resolve(m.len(), i) {
                        Some(at) => {
                            let n = n.min(m.len() - at);
                            m.drain(at..at + n);
                            n
                        }
                        None => 0,
                    };
                    prop_assert_eq!(removed, expected);
                }
                ListOp::Get(i) => {
                    let got = ql.get(i).map(|e| e.into_vec());
                    let expected = resolve(m.len(), i).map(|at| m[at].clone());
                    prop_assert_eq!(got, expected);
                }
                ListOp::Rotate => {
                    ql.rotate().unwrap();
                    if let Some(v) = m.pop_back() {
                        m.push_front(v);
                    }
                }
            }
            prop_assert_eq!(ql.len(), m.len());
        }

        check_list(&ql, &m)?;
    }

    #[test]
    fn prop_dict_equivalence(ops in dict_ops_strategy(), seed in any::<u64>()) {
        let mut d: Dict<Vec<u8>, u64> = Dict::with_seed(seed);
        let mut m: HashMap<Vec<u8>, u64> = HashMap::new();

        for op in ops {
            match op {
                DictOp::Add(k, v) => {
                    let key = dict_key(k);
                    let added = d.add(key.clone(), v).is_ok();
                    prop_assert_eq!(added, !m.contains_key(&key));
                    m.entry(key).or_insert(v);
                }
                DictOp::Replace(k, v) => {
                    let key = dict_key(k);
                    let old = d.replace(key.clone(), v).unwrap();
                    prop_assert_eq!(old, m.insert(key, v));
                }
                DictOp::Delete(k) => {
                    let key = dict_key(k);
                    prop_assert_eq!(d.delete(key.as_slice()), m.remove(&key).is_some());
                }
                DictOp::Get(k) => {
                    let key = dict_key(k);
                    prop_assert_eq!(d.get(key.as_slice()), m.get(&key));
                }
                DictOp::Rehash(n) => {
                    d.rehash(n);
                }
                DictOp::Resize => {
                    // Rejections (mid-rehash, already minimal) are fine here.
                    let _ = d.resize();
                }
            }
            prop_assert_eq!(d.len(), m.len());
            if let Err(e) = d.validate() {
                return Err(TestCaseError::fail(e));
            }
        }

        let mut got: Vec<(Vec<u8>, u64)> = d.iter().map(|(k, v)| (k.clone(), *v)).collect();
        let mut expected: Vec<(Vec<u8>, u64)> = m.into_iter().collect();
        got.sort();
        expected.sort();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_skiplist_equivalence(ops in zsl_ops_strategy(), seed in any::<u64>()) {
        let mut zsl = Skiplist::with_seed(seed);
        let mut m: Vec<(f64, Vec<u8>)> = Vec::new();

        for op in ops {
            match op {
                ZslOp::Insert(s, member) => {
                    let member = zsl_member(member);
                    if !m.iter().any(|(_, x)| *x == member) {
                        zsl.insert(s as f64, Sds::new(&member)).unwrap();
                        m.push((s as f64, member));
                        m.sort_by(zsl_cmp);
                    }
                }
                ZslOp::Delete(member) => {
                    let member = zsl_member(member);
                    match m.iter().position(|(_, x)| *x == member) {
                        Some(i) => {
                            let (score, _) = m.remove(i);
                            let removed = zsl.delete(score, &member);
                            prop_assert_eq!(removed.map(|s| s.as_bytes().to_vec()), Some(member));
                        }
                        None => prop_assert!(zsl.delete(0.0, &member).is_none()),
                    }
                }
                ZslOp::Update(member, s) => {
                    let member = zsl_member(member);
                    if let Some(i) = m.iter().position(|(_, x)| *x == member) {
                        let cur = m[i].0;
                        prop_assert!(zsl.update_score(&member, cur, s as f64).unwrap());
                        m[i].0 = s as f64;
                        m.sort_by(zsl_cmp);
                    }
                }
                ZslOp::Rank(member) => {
                    let member = zsl_member(member);
                    if let Some(i) = m.iter().position(|(_, x)| *x == member) {
                        prop_assert_eq!(zsl.rank(m[i].0, &member), Some(i + 1));
                        let (got, score) = zsl.element_by_rank(i + 1).unwrap();
                        prop_assert_eq!(got.as_bytes(), member.as_slice());
                        prop_assert_eq!(score, m[i].0);
                    }
                }
            }
            prop_assert_eq!(zsl.len(), m.len());
        }

        if let Err(e) = zsl.validate() {
            return Err(TestCaseError::fail(e));
        }
        let got: Vec<(f64, Vec<u8>)> = zsl.iter().map(|(s, score)| (score, s.as_bytes().to_vec())).collect();
        prop_assert_eq!(got, m);
    }

    #[test]
    fn prop_listpack_equivalence(ops in lp_ops_strategy()) {
        let mut lp = Listpack::new();
        let mut m: Vec<Vec<u8>> = Vec::new();

        for op in ops {
            match op {
                LpOp::Append(v) => {
                    lp.append(&v).unwrap();
                    m.push(v);
                }
                LpOp::Prepend(v) => {
                    lp.prepend(&v).unwrap();
                    m.insert(0, v);
                }
                LpOp::Insert(i, v, after) => {
                    let side = if after { Where::After } else { Where::Before };
                    match (lp.seek(i), resolve(m.len(), i)) {
                        (Some(p), Some(at)) => {
                            let p = lp.insert(p, side, &v).unwrap();
                            prop_assert!(lp.get(p).eq_bytes(&v));
                            m.insert(if after { at + 1 } else { at }, v);
                        }
                        (None, None) => {}
                        (got, expected) => prop_assert!(false, "seek {:?} vs {:?}", got, expected),
                    }
                }
                LpOp::Replace(i, v) => {
                    if let (Some(p), Some(at)) = (lp.seek(i), resolve(m.len(), i)) {
                        lp.replace(p, &v).unwrap();
                        m[at] = v;
                    }
                }
                LpOp::Delete(i) => {
                    if let (Some(p), Some(at)) = (lp.seek(i), resolve(m.len(), i)) {
                        lp.delete(p);
                        m.remove(at);
                    }
                }
                LpOp::DeleteRange(i, n) => {
                    let removed = lp.delete_range(i, n);
                    let expected = match resolve(m.len(), i) {
                        Some(at) => {
                            let n = n.min(m.len() - at);
                            m.drain(at..at + n);
                            n
                        }
                        None => 0,
                    };
                    prop_assert_eq!(removed, expected);
                }
            }
            prop_assert_eq!(lp.len(), m.len());
        }

        prop_assert!(Listpack::validate_integrity(lp.as_bytes(), true).is_ok());
        let got: Vec<Vec<u8>> = lp.iter().map(|e| e.to_vec()).collect();
        prop_assert_eq!(&got, &m);
        let rev: Vec<Vec<u8>> = lp.iter().rev().map(|e| e.to_vec()).collect();
        let expected_rev: Vec<Vec<u8>> = m.iter().rev().cloned().collect();
        prop_assert_eq!(rev, expected_rev);
    }

    #[test]
    fn prop_intset_equivalence(
        ops in prop::collection::vec((any::<bool>(), prop_oneof![
            -300i64..300,
            any::<i16>().prop_map(i64::from),
            any::<i32>().prop_map(i64::from),
            any::<i64>(),
        ]), 0..=400),
    ) {
        let mut is = Intset::new();
        let mut m: BTreeSet<i64> = BTreeSet::new();

        for (add, v) in ops {
            if add {
                prop_assert_eq!(is.add(v).unwrap(), m.insert(v));
            } else {
                prop_assert_eq!(is.remove(v), m.remove(&v));
            }
            prop_assert_eq!(is.len(), m.len());
            prop_assert_eq!(is.contains(v), m.contains(&v));
        }

        let got: Vec<i64> = is.iter().collect();
        let expected: Vec<i64> = m.iter().copied().collect();
        prop_assert_eq!(got, expected);
        prop_assert_eq!(is.min(), m.first().copied());
        prop_assert_eq!(is.max(), m.last().copied());
        prop_assert!(Intset::from_bytes(is.as_bytes().to_vec()).is_ok());
    }

    #[test]
    fn prop_sds_equivalence(ops in sds_ops_strategy()) {
        let mut s = Sds::empty();
        let mut m: Vec<u8> = Vec::new();

        for op in ops {
            match op {
                SdsOp::Cat(b) => {
                    s.cat_len(&b).unwrap();
                    m.extend_from_slice(&b);
                }
                SdsOp::Range(start, end) => {
                    s.range(start, end);
                    model_range(&mut m, start, end);
                }
                SdsOp::Trim(cset) => {
                    s.trim(&cset);
                    model_trim(&mut m, &cset);
                }
                SdsOp::Upper => {
                    s.to_upper();
                    m.make_ascii_uppercase();
                }
                SdsOp::Clear => {
                    s.clear();
                    m.clear();
                }
                SdsOp::CatSelf => {
                    s.cat_self().unwrap();
                    m.extend_from_within(..);
                }
                SdsOp::Shrink => {
                    s.remove_free_space();
                    prop_assert_eq!(s.avail(), 0);
                }
            }
            prop_assert_eq!(s.as_bytes(), m.as_slice());
            prop_assert!(s.alloc() >= s.len());
            prop_assert_eq!(s.as_bytes_with_nul().last(), Some(&0));
        }
    }
}

#[test]
fn dict_rehash_keeps_every_key_reachable() {
    let mut d: Dict<Vec<u8>, u32> = Dict::with_seed(7);
    for i in 0..1000u32 {
        d.add(dict_key(i as u16), i).unwrap();
        // Every key stays visible at every step of every rehash.
        if d.is_rehashing() {
            for j in 0..=i {
                assert_eq!(d.get(dict_key(j as u16).as_slice()), Some(&j));
            }
        }
    }
    d.validate().unwrap();
}
