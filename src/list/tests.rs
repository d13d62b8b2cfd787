use crate::list::SlotList;

#[test]
fn new_list_is_empty() {
    let list = SlotList::<u32>::new();
    assert!(list.is_empty());
    assert_eq!(list.len(), 0);
    assert_eq!(list.iter().count(), 0);
    assert_eq!(list.first(), None);
}

#[test]
fn iterates_in_insertion_order() {
    let mut list = SlotList::new();
    for name in ["a", "b", "c", "d"] {
        list.push_back(name).unwrap();
    }
    let got: Vec<_> = list.iter().map(|(_, v)| *v).collect();
    assert_eq!(got, ["a", "b", "c", "d"]);
}

#[test]
fn remove_from_middle_relinks_neighbours() {
    let mut list = SlotList::new();
    let a = list.push_back(1).unwrap();
    let b = list.push_back(2).unwrap();
    let c = list.push_back(3).unwrap();
    assert_eq!(list.remove(b), Some(2));
    let got: Vec<_> = list.iter().map(|(_, v)| *v).collect();
    assert_eq!(got, [1, 3]);
    assert_eq!(list.remove(a), Some(1));
    assert_eq!(list.remove(c), Some(3));
    assert!(list.is_empty());
}

#[test]
fn stale_key_does_not_reach_reused_slot() {
    let mut list = SlotList::new();
    let old = list.push_back("old").unwrap();
    list.remove(old);
    let new = list.push_back("new").unwrap();
    assert_eq!(old.index(), new.index());
    assert_ne!(old, new);
    assert_eq!(list.get(old), None);
    assert_eq!(list.remove(old), None);
    assert_eq!(list.get(new), Some(&"new"));
    assert_eq!(list.len(), 1);
}

#[test]
fn reused_slot_goes_to_the_tail() {
    let mut list = SlotList::new();
    let a = list.push_back('a').unwrap();
    list.push_back('b').unwrap();
    list.remove(a);
    list.push_back('c').unwrap();
    let got: String = list.iter().map(|(_, v)| *v).collect();
    assert_eq!(got, "bc");
}

#[test]
fn get_mut_updates_in_place() {
    let mut list = SlotList::new();
    let k = list.push_back(10).unwrap();
    *list.get_mut(k).unwrap() += 5;
    assert_eq!(list.get(k), Some(&15));
}

#[test]
fn drain_empties_in_order() {
    let mut list = SlotList::new();
    let keys: Vec<_> = (0..5).map(|i| list.push_back(i).unwrap()).collect();
    assert_eq!(list.drain(), vec![0, 1, 2, 3, 4]);
    assert!(list.is_empty());
    assert!(keys.iter().all(|k| !list.contains(*k)));
}
